//! Text-run extraction from page content streams.
//!
//! Walks the decoded operation list tracking the text state (font, text
//! matrix, line translations) and emits one run per show-text operator.
//! The codec reports positions bottom-up; runs are flipped to top-down via
//! `page_height - y - font_size` so the rest of the editor only ever sees
//! top-down page coordinates.

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::{number, EngineResult, CHAR_WIDTH_FACTOR};

/// One recovered fragment of page text, in top-down page coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRunInfo {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub font_size: f32,
    pub font_name: String,
}

struct TextState {
    /// Nominal size from the last `Tf`.
    tf_size: f32,
    /// Vertical scale term of the text matrix; effective size is
    /// `|tf_size * scale|`.
    scale: f32,
    x: f32,
    y: f32,
    leading: f32,
    font_name: String,
}

impl TextState {
    fn reset() -> Self {
        Self { tf_size: 12.0, scale: 1.0, x: 0.0, y: 0.0, leading: 0.0, font_name: String::new() }
    }

    fn effective_size(&self) -> f32 {
        (self.tf_size * self.scale).abs()
    }
}

/// Extract every text run on a page. Runs appear in content order, which
/// the dedup pass upstream relies on (later content masks earlier content).
pub fn extract_runs(
    doc: &Document,
    page_id: ObjectId,
    page_height: f32,
) -> EngineResult<Vec<TextRunInfo>> {
    let bytes = doc.get_page_content(page_id)?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let content = Content::decode(&bytes)?;
    let mut state = TextState::reset();
    let mut runs = Vec::new();

    for op in &content.operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => state = TextState::reset(),
            "Tf" => {
                if operands.len() == 2 {
                    if let Ok(resource_key) = operands[0].as_name() {
                        state.font_name = resolve_font_name(doc, page_id, resource_key)
                            .unwrap_or_else(|| String::from_utf8_lossy(resource_key).into_owned());
                    }
                    if let Some(size) = number(&operands[1]) {
                        state.tf_size = size;
                    }
                }
            }
            "Tm" => {
                if operands.len() == 6 {
                    if let Some(scale) = number(&operands[3]) {
                        state.scale = scale;
                    }
                    if let Some(x) = number(&operands[4]) {
                        state.x = x;
                    }
                    if let Some(y) = number(&operands[5]) {
                        state.y = y;
                    }
                }
            }
            "Td" | "TD" => {
                if operands.len() == 2 {
                    if let (Some(tx), Some(ty)) = (number(&operands[0]), number(&operands[1])) {
                        state.x += tx;
                        state.y += ty;
                        if op.operator == "TD" {
                            state.leading = -ty;
                        }
                    }
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    state.leading = leading;
                }
            }
            "T*" => state.y -= state.leading,
            "Tj" => {
                if let Some(text) = operands.first().and_then(decode_string) {
                    push_run(&mut runs, &state, page_height, text);
                }
            }
            "'" => {
                state.y -= state.leading;
                if let Some(text) = operands.first().and_then(decode_string) {
                    push_run(&mut runs, &state, page_height, text);
                }
            }
            "\"" => {
                state.y -= state.leading;
                if let Some(text) = operands.get(2).and_then(decode_string) {
                    push_run(&mut runs, &state, page_height, text);
                }
            }
            "TJ" => {
                let text: String = operands
                    .first()
                    .and_then(|obj| obj.as_array().ok())
                    .map(|parts| {
                        parts
                            .iter()
                            .filter_map(decode_string)
                            .collect::<Vec<_>>()
                            .concat()
                    })
                    .unwrap_or_default();
                if !text.is_empty() {
                    push_run(&mut runs, &state, page_height, text);
                }
            }
            _ => {}
        }
    }

    Ok(runs)
}

fn push_run(runs: &mut Vec<TextRunInfo>, state: &TextState, page_height: f32, text: String) {
    if text.is_empty() {
        return;
    }

    let size = state.effective_size();
    runs.push(TextRunInfo {
        x: state.x,
        y: page_height - state.y - size,
        width: text.chars().count() as f32 * size * CHAR_WIDTH_FACTOR,
        height: size,
        font_size: size,
        font_name: state.font_name.clone(),
        text,
    });
}

fn decode_string(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn deref_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Dictionary(dict) => Some(dict),
        Object::Reference(id) => doc.get_object(*id).ok().and_then(|o| o.as_dict().ok()),
        _ => None,
    }
}

/// Map a font resource key (`/F1`) to its `BaseFont` name, walking the
/// `Parent` chain for inherited resource dictionaries.
fn resolve_font_name(doc: &Document, page_id: ObjectId, resource_key: &[u8]) -> Option<String> {
    let mut current = Some(page_id);
    for _ in 0..16 {
        let dict = doc.get_dictionary(current?).ok()?;

        if let Some(resources) = dict.get(b"Resources").ok().and_then(|obj| deref_dict(doc, obj)) {
            if let Some(fonts) = resources.get(b"Font").ok().and_then(|obj| deref_dict(doc, obj)) {
                if let Some(font) = fonts.get(resource_key).ok().and_then(|obj| deref_dict(doc, obj))
                {
                    if let Ok(base) = font.get(b"BaseFont").and_then(|obj| obj.as_name()) {
                        return Some(String::from_utf8_lossy(base).into_owned());
                    }
                }
            }
        }

        current = dict.get(b"Parent").ok().and_then(|obj| obj.as_reference().ok());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn doc_with_content(content: &str) -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Times-Roman",
        });
        let content_id = doc.add_object(Object::Stream(Stream::new(
            dictionary! {},
            content.as_bytes().to_vec(),
        )));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0_i64.into(), 0_i64.into(), 612_i64.into(), 792_i64.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        (doc, page_id)
    }

    #[test]
    fn emits_runs_in_content_order() {
        let (doc, page_id) = doc_with_content(
            "BT /F1 10 Tf 50 700 Td (first) Tj 0 -20 Td (second) Tj ET",
        );
        let runs = extract_runs(&doc, page_id, 792.0).expect("extract");

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].text, "first");
        assert_eq!(runs[1].text, "second");
        assert_eq!(runs[1].x, 50.0);
        // second line sits 20 units below: 792 - 680 - 10
        assert_eq!(runs[1].y, 102.0);
    }

    #[test]
    fn text_matrix_scale_drives_font_size() {
        let (doc, page_id) = doc_with_content(
            "BT /F1 1 Tf 18 0 0 18 72 720 Tm (big) Tj ET",
        );
        let runs = extract_runs(&doc, page_id, 792.0).expect("extract");

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].font_size, 18.0);
        assert_eq!(runs[0].x, 72.0);
        assert_eq!(runs[0].y, 792.0 - 720.0 - 18.0);
    }

    #[test]
    fn tj_array_concatenates_ignoring_kerning() {
        let (doc, page_id) = doc_with_content(
            "BT /F1 12 Tf 100 100 Td [(Hel) -20 (lo)] TJ ET",
        );
        let runs = extract_runs(&doc, page_id, 792.0).expect("extract");

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "Hello");
    }

    #[test]
    fn resolves_base_font_through_resources() {
        let (doc, page_id) = doc_with_content("BT /F1 12 Tf 0 0 Td (x) Tj ET");
        let runs = extract_runs(&doc, page_id, 792.0).expect("extract");

        assert_eq!(runs[0].font_name, "Times-Roman");
    }

    #[test]
    fn empty_content_yields_no_runs() {
        let (doc, page_id) = doc_with_content("");
        let runs = extract_runs(&doc, page_id, 792.0).expect("extract");
        assert!(runs.is_empty());
    }
}
