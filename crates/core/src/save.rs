//! Flattens annotations into a new PDF.
//!
//! The save path re-opens the pristine original bytes (never the render
//! engine's state), appends one content stream per annotated page and
//! registers the resources those streams need. Geometry flips back from
//! top-down page coordinates to the codec's bottom-up convention via
//! `page_height - y - height`.

use std::io::Write as _;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, warn};

use redline_engine::media_box_size;
use redline_storage::SavedDocument;

use crate::annotation::{estimated_text_width, AnnotationShape, AnnotationStore};
use crate::config::EditorConfig;

/// Resource keys registered by the save path. Prefixed to avoid colliding
/// with names already used by the document.
const EXT_GSTATE_KEY: &str = "RLGS";
const FONT_KEY: &str = "RLF";
const IMAGE_KEY_PREFIX: &str = "RLImg";

const HIGHLIGHT_ALPHA: f32 = 0.3;

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("annotated page {page} does not exist in the document")]
    MissingPage { page: u16 },
    #[error("signature image error: {0}")]
    Image(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produce the final document from the original bytes plus the committed
/// annotations. A store with no annotations returns the original bytes
/// untouched.
pub fn serialize(
    original: &[u8],
    store: &AnnotationStore,
    config: &EditorConfig,
    filename: &str,
) -> Result<SavedDocument, SaveError> {
    if store.is_empty() {
        return Ok(SavedDocument::pdf(original.to_vec(), filename));
    }

    let mut doc = Document::load_mem(original)?;
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

    let needs_font = store.permanent().iter().any(|a| {
        matches!(
            a.shape,
            AnnotationShape::FreeText { .. } | AnnotationShape::TextEdit { .. }
        )
    });
    let font_id = needs_font.then(|| {
        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        })
    });

    let mut image_counter = 0_u32;
    let annotated_pages: Vec<u16> = {
        let mut pages: Vec<u16> =
            store.permanent().iter().map(|a| a.page_index).collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    };

    for page_index in annotated_pages {
        let page_id = *page_ids
            .get(page_index as usize)
            .ok_or(SaveError::MissingPage { page: page_index })?;
        let page_height = media_box_size(&doc, page_id).height_pt;

        let mut ops: Vec<Operation> = Vec::new();
        let mut needs_gstate = false;

        for annotation in store.page_annotations(page_index) {
            match &annotation.shape {
                AnnotationShape::Highlight { rect, color } => {
                    needs_gstate = true;
                    let (r, g, b, _) = color.to_normalized();
                    ops.push(Operation::new("q", vec![]));
                    ops.push(Operation::new(
                        "gs",
                        vec![Object::Name(EXT_GSTATE_KEY.into())],
                    ));
                    ops.push(Operation::new("rg", reals(&[r, g, b])));
                    ops.push(Operation::new(
                        "re",
                        reals(&[
                            rect.x,
                            page_height - rect.y - rect.height,
                            rect.width,
                            rect.height,
                        ]),
                    ));
                    ops.push(Operation::new("f", vec![]));
                    ops.push(Operation::new("Q", vec![]));
                }
                AnnotationShape::FreeText { position, content, font_size } => {
                    push_text_ops(&mut ops, position.x, position.y, content, *font_size, page_height);
                }
                AnnotationShape::TextEdit { position, content, original_text, font_size } => {
                    let cover_width = estimated_text_width(content, *font_size)
                        .max(estimated_text_width(original_text, *font_size));
                    let pad = config.cover_padding;

                    ops.push(Operation::new("q", vec![]));
                    ops.push(Operation::new("rg", reals(&[1.0, 1.0, 1.0])));
                    ops.push(Operation::new(
                        "re",
                        reals(&[
                            position.x - pad,
                            page_height - position.y - font_size - pad,
                            cover_width + 2.0 * pad,
                            font_size + 2.0 * pad,
                        ]),
                    ));
                    ops.push(Operation::new("f", vec![]));
                    ops.push(Operation::new("Q", vec![]));

                    if !content.is_empty() {
                        push_text_ops(
                            &mut ops,
                            position.x,
                            position.y,
                            content,
                            *font_size,
                            page_height,
                        );
                    }
                }
                AnnotationShape::Signature { rect, png_base64 } => {
                    // A bad image drops this one annotation, never the save.
                    let stream = match signature_image_stream(&mut doc, png_base64) {
                        Ok(stream) => stream,
                        Err(err) => {
                            warn!(annotation = %annotation.id, %err, "skipping unrenderable signature");
                            continue;
                        }
                    };
                    image_counter += 1;
                    let key = format!("{IMAGE_KEY_PREFIX}{image_counter}");
                    let image_id = doc.add_object(Object::Stream(stream));
                    add_resource_entry(
                        &mut doc,
                        page_id,
                        "XObject",
                        &key,
                        Object::Reference(image_id),
                    )?;

                    ops.push(Operation::new("q", vec![]));
                    ops.push(Operation::new(
                        "cm",
                        reals(&[
                            rect.width,
                            0.0,
                            0.0,
                            rect.height,
                            rect.x,
                            page_height - rect.y - rect.height,
                        ]),
                    ));
                    ops.push(Operation::new("Do", vec![Object::Name(key.into())]));
                    ops.push(Operation::new("Q", vec![]));
                }
            }
        }

        if ops.is_empty() {
            continue;
        }

        if needs_gstate {
            let gstate_id = doc.add_object(dictionary! {
                "Type" => "ExtGState",
                "ca" => HIGHLIGHT_ALPHA,
                "CA" => HIGHLIGHT_ALPHA,
            });
            add_resource_entry(
                &mut doc,
                page_id,
                "ExtGState",
                EXT_GSTATE_KEY,
                Object::Reference(gstate_id),
            )?;
        }
        if let Some(font_id) = font_id {
            add_resource_entry(&mut doc, page_id, "Font", FONT_KEY, Object::Reference(font_id))?;
        }

        append_content(&mut doc, page_id, ops)?;
        debug!(page = page_index, "flattened annotations onto page");
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(SavedDocument::pdf(bytes, filename))
}

fn reals(values: &[f32]) -> Vec<Object> {
    values.iter().map(|v| Object::Real(*v)).collect()
}

fn push_text_ops(
    ops: &mut Vec<Operation>,
    x: f32,
    y: f32,
    content: &str,
    font_size: f32,
    page_height: f32,
) {
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![Object::Name(FONT_KEY.into()), Object::Real(font_size)],
    ));
    ops.push(Operation::new("rg", reals(&[0.0, 0.0, 0.0])));
    ops.push(Operation::new("Td", reals(&[x, page_height - y - font_size])));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(content.as_bytes().to_vec(), StringFormat::Literal)],
    ));
    ops.push(Operation::new("ET", vec![]));
    ops.push(Operation::new("Q", vec![]));
}

/// Decode a base64 PNG into a flate-compressed RGB image XObject. The
/// alpha channel goes into a separate `SMask` grayscale stream so a
/// transparent signature background stays transparent over the page.
fn signature_image_stream(doc: &mut Document, png_base64: &str) -> Result<Stream, SaveError> {
    let png = BASE64
        .decode(png_base64)
        .map_err(|err| SaveError::Image(err.to_string()))?;
    let image =
        image::load_from_memory(&png).map_err(|err| SaveError::Image(err.to_string()))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    for pixel in rgba.pixels() {
        rgb.extend_from_slice(&[pixel[0], pixel[1], pixel[2]]);
        alpha.push(pixel[3]);
    }

    let smask_id = doc.add_object(Object::Stream(
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8_i64,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        )
        .with_compression(false),
    ));

    Ok(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8_i64,
            "Filter" => "FlateDecode",
            "SMask" => smask_id,
        },
        deflate(&rgb)?,
    )
    .with_compression(false))
}

fn deflate(bytes: &[u8]) -> Result<Vec<u8>, SaveError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Walk the `Parent` chain for an inherited `Resources` dictionary.
fn inherited_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    let mut current = doc
        .get_dictionary(page_id)
        .ok()?
        .get(b"Parent")
        .ok()
        .and_then(|obj| obj.as_reference().ok());

    for _ in 0..16 {
        let dict = doc.get_dictionary(current?).ok()?;
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(resources)) => return Some(resources.clone()),
            Ok(Object::Reference(id)) => return doc.get_dictionary(*id).ok().cloned(),
            _ => {}
        }
        current = dict.get(b"Parent").ok().and_then(|obj| obj.as_reference().ok());
    }
    None
}

/// Make the page carry its own inline `Resources` dictionary, cloning a
/// referenced or inherited one so edits stay local to this page.
fn ensure_inline_resources(doc: &mut Document, page_id: ObjectId) -> Result<(), SaveError> {
    let resolved: Dictionary = {
        let page = doc.get_dictionary(page_id)?;
        match page.get(b"Resources") {
            Ok(Object::Dictionary(_)) => return Ok(()),
            Ok(Object::Reference(id)) => doc.get_dictionary(*id)?.clone(),
            _ => inherited_resources(doc, page_id).unwrap_or_default(),
        }
    };

    let page = doc.get_dictionary_mut(page_id)?;
    page.set("Resources", Object::Dictionary(resolved));
    Ok(())
}

/// Register `key` under a resource category (`Font`, `XObject`, ...) on a
/// page, materializing the category dictionary if needed.
fn add_resource_entry(
    doc: &mut Document,
    page_id: ObjectId,
    category: &str,
    key: &str,
    value: Object,
) -> Result<(), SaveError> {
    ensure_inline_resources(doc, page_id)?;

    let mut category_dict: Dictionary = {
        let page = doc.get_dictionary(page_id)?;
        let resources = page.get(b"Resources")?.as_dict()?;
        match resources.get(category.as_bytes()) {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(id)) => doc.get_dictionary(*id)?.clone(),
            _ => Dictionary::new(),
        }
    };
    category_dict.set(key, value);

    let page = doc.get_dictionary_mut(page_id)?;
    let resources = page.get_mut(b"Resources")?.as_dict_mut()?;
    resources.set(category, Object::Dictionary(category_dict));
    Ok(())
}

/// Append a new content stream after the page's existing content so the
/// annotations draw on top of the original page.
fn append_content(
    doc: &mut Document,
    page_id: ObjectId,
    operations: Vec<Operation>,
) -> Result<(), SaveError> {
    let encoded = Content { operations }.encode()?;
    let appended_id = doc.add_object(Object::Stream(Stream::new(dictionary! {}, encoded)));

    enum Existing {
        None,
        Array(Vec<Object>),
        Reference(ObjectId),
        Inline(Stream),
    }

    let existing = {
        let page = doc.get_dictionary(page_id)?;
        match page.get(b"Contents") {
            Ok(Object::Array(items)) => Existing::Array(items.clone()),
            Ok(Object::Reference(id)) => Existing::Reference(*id),
            Ok(Object::Stream(stream)) => Existing::Inline(stream.clone()),
            _ => Existing::None,
        }
    };

    let contents = match existing {
        Existing::Array(mut items) => {
            items.push(appended_id.into());
            Object::Array(items)
        }
        Existing::Reference(id) => Object::Array(vec![id.into(), appended_id.into()]),
        Existing::Inline(stream) => {
            let moved_id = doc.add_object(Object::Stream(stream));
            Object::Array(vec![moved_id.into(), appended_id.into()])
        }
        Existing::None => appended_id.into(),
    };

    let page = doc.get_dictionary_mut(page_id)?;
    page.set("Contents", contents);
    Ok(())
}
