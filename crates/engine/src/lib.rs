//! PDF codec boundary for the editor.
//!
//! The editor treats the document format as an opaque dependency behind the
//! [`RenderBackend`] trait: page geometry, rasterization to an RGBA surface
//! and text-run extraction. The default backend parses with `lopdf`; a
//! `pdfium` feature swaps in real pixel rendering where the system library
//! is available.
//!
//! A backend is constructed from its own copy of the document bytes. The
//! bytes handed to a backend are consumed by it; callers that need to
//! re-read the original document (the save path does) must keep an
//! independent buffer.

mod extract;

use lopdf::{Document, Object, ObjectId};

pub use extract::TextRunInfo;

pub type RgbaImage = image::ImageBuffer<image::Rgba<u8>, Vec<u8>>;

/// Width estimate factor for runs whose extent the codec does not report:
/// `text.len() * font_size * CHAR_WIDTH_FACTOR`.
pub const CHAR_WIDTH_FACTOR: f32 = 0.6;

/// Page dimensions in unscaled page units (points).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// Page rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    pub fn rotated_cw(self) -> Self {
        match self {
            Self::Deg0 => Self::Deg90,
            Self::Deg90 => Self::Deg180,
            Self::Deg180 => Self::Deg270,
            Self::Deg270 => Self::Deg0,
        }
    }

    /// Whether the raster surface swaps width and height at this rotation.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u16, page_count: u16 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    Empty,
    #[error("backend error: {0}")]
    Backend(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Rasterization and text extraction over one parsed document.
pub trait RenderBackend {
    fn page_count(&self) -> u16;

    fn page_size(&self, page_index: u16) -> EngineResult<PageSize>;

    /// Rasterize a page to an RGBA surface sized to the page's viewport at
    /// the given zoom and rotation.
    fn rasterize(&self, page_index: u16, zoom: f32, rotation: Rotation)
        -> EngineResult<RgbaImage>;

    /// Extract every text run on a page, positions already converted to
    /// top-down page coordinates.
    fn extract_text_runs(&self, page_index: u16) -> EngineResult<Vec<TextRunInfo>>;
}

/// Resolve a page's size from its `MediaBox`, walking up the `Parent`
/// chain for inherited boxes. Falls back to US Letter when absent.
pub fn media_box_size(doc: &Document, page_id: ObjectId) -> PageSize {
    let mut current = Some(page_id);
    // Bounded walk so a cyclic Parent chain cannot hang us.
    for _ in 0..16 {
        let Some(id) = current else { break };
        let Ok(dict) = doc.get_dictionary(id) else { break };

        if let Some(size) = dict
            .get(b"MediaBox")
            .ok()
            .and_then(|obj| resolve_array(doc, obj))
            .and_then(|array| {
                if array.len() != 4 {
                    return None;
                }
                let x0 = number(&array[0])?;
                let y0 = number(&array[1])?;
                let x1 = number(&array[2])?;
                let y1 = number(&array[3])?;
                Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
            })
        {
            return size;
        }

        current = dict
            .get(b"Parent")
            .ok()
            .and_then(|obj| obj.as_reference().ok());
    }

    PageSize { width_pt: 612.0, height_pt: 792.0 }
}

fn resolve_array<'a>(doc: &'a Document, obj: &'a Object) -> Option<Vec<Object>> {
    match obj {
        Object::Array(array) => Some(array.clone()),
        Object::Reference(id) => doc
            .get_object(*id)
            .ok()
            .and_then(|resolved| resolved.as_array().ok())
            .cloned(),
        _ => None,
    }
}

pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

/// Default backend: `lopdf` for geometry and text, synthetic raster pixels.
///
/// Raster output is a white page surface with a hairline border, sized
/// exactly as a real renderer would size it; pixel-accurate rendering comes
/// from the `pdfium` feature.
pub struct LopdfBackend {
    doc: Document,
    page_ids: Vec<ObjectId>,
    page_sizes: Vec<PageSize>,
}

impl LopdfBackend {
    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.windows(b"/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(EngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(EngineError::Empty);
        }

        let page_sizes = page_ids.iter().map(|id| media_box_size(&doc, *id)).collect();
        tracing::debug!(pages = page_ids.len(), "document parsed");

        Ok(Self { doc, page_ids, page_sizes })
    }

    fn page_id(&self, page_index: u16) -> EngineResult<ObjectId> {
        self.page_ids
            .get(page_index as usize)
            .copied()
            .ok_or(EngineError::PageOutOfRange {
                page: page_index,
                page_count: self.page_ids.len() as u16,
            })
    }
}

impl RenderBackend for LopdfBackend {
    fn page_count(&self) -> u16 {
        self.page_ids.len() as u16
    }

    fn page_size(&self, page_index: u16) -> EngineResult<PageSize> {
        self.page_sizes
            .get(page_index as usize)
            .copied()
            .ok_or(EngineError::PageOutOfRange {
                page: page_index,
                page_count: self.page_ids.len() as u16,
            })
    }

    fn rasterize(
        &self,
        page_index: u16,
        zoom: f32,
        rotation: Rotation,
    ) -> EngineResult<RgbaImage> {
        let size = self.page_size(page_index)?;
        let zoom = if zoom <= 0.0 { 1.0 } else { zoom };

        let (mut width_pt, mut height_pt) = (size.width_pt, size.height_pt);
        if rotation.swaps_axes() {
            std::mem::swap(&mut width_pt, &mut height_pt);
        }

        let width = (width_pt * zoom).round().max(1.0) as u32;
        let height = (height_pt * zoom).round().max(1.0) as u32;

        let mut surface =
            RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            let border = image::Rgba([220, 220, 220, 255]);
            for x in 0..width {
                surface.put_pixel(x, 0, border);
                surface.put_pixel(x, height - 1, border);
            }
            for y in 0..height {
                surface.put_pixel(0, y, border);
                surface.put_pixel(width - 1, y, border);
            }
        }

        Ok(surface)
    }

    fn extract_text_runs(&self, page_index: u16) -> EngineResult<Vec<TextRunInfo>> {
        let page_id = self.page_id(page_index)?;
        let size = self.page_size(page_index)?;
        extract::extract_runs(&self.doc, page_id, size.height_pt)
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    //! Pixel-accurate rasterization via a system pdfium library.

    use super::*;
    use pdfium_render::prelude::*;

    pub struct PdfiumBackend {
        inner: LopdfBackend,
    }

    impl PdfiumBackend {
        /// Bind the system pdfium library and fall back to `lopdf` for
        /// geometry and text extraction.
        pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
            let _ = Pdfium::bind_to_system_library().map_err(|err| {
                EngineError::Backend(format!("failed to bind pdfium system library: {err}"))
            })?;

            Ok(Self { inner: LopdfBackend::from_bytes(bytes)? })
        }
    }

    impl RenderBackend for PdfiumBackend {
        fn page_count(&self) -> u16 {
            self.inner.page_count()
        }

        fn page_size(&self, page_index: u16) -> EngineResult<PageSize> {
            self.inner.page_size(page_index)
        }

        fn rasterize(
            &self,
            page_index: u16,
            zoom: f32,
            rotation: Rotation,
        ) -> EngineResult<RgbaImage> {
            self.inner.rasterize(page_index, zoom, rotation)
        }

        fn extract_text_runs(&self, page_index: u16) -> EngineResult<Vec<TextRunInfo>> {
            self.inner.extract_text_runs(page_index)
        }
    }
}
