//! Annotation data model.
//!
//! One sum-type case per annotation kind, so a highlight can never carry
//! image data and a signature can never carry replacement text. All
//! geometry is stored in unscaled top-down page units.
//!
//! The store keeps permanent annotations append-only until save. The
//! drag-preview text edit lives in a separate pending slot and is either
//! promoted into the permanent list on drag release or discarded; it can
//! never survive as a duplicate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use redline_engine::CHAR_WIDTH_FACTOR;

use crate::transform::{PagePoint, PageRect};

pub type AnnotationId = Uuid;

/// RGBA color. Alpha is meaningful for highlights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Default highlight fill: yellow at ~0.3 alpha.
    pub const HIGHLIGHT_YELLOW: Color = Color::new(255, 235, 59, 77);
    pub const BLACK: Color = Color::new(0, 0, 0, 255);
    pub const WHITE: Color = Color::new(255, 255, 255, 255);

    pub fn to_normalized(self) -> (f32, f32, f32, f32) {
        (
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
            self.a as f32 / 255.0,
        )
    }
}

/// Estimated drawn width of a text string, matching the width estimate the
/// extraction engine uses for unreported run extents.
pub fn estimated_text_width(text: &str, font_size: f32) -> f32 {
    text.chars().count() as f32 * font_size * CHAR_WIDTH_FACTOR
}

/// The annotation payload, one case per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnnotationShape {
    Highlight {
        rect: PageRect,
        color: Color,
    },
    FreeText {
        position: PagePoint,
        content: String,
        font_size: f32,
    },
    Signature {
        rect: PageRect,
        png_base64: String,
    },
    /// Replacement for an original text run: at save time the original is
    /// covered with a white rectangle and `content` is drawn on top.
    TextEdit {
        position: PagePoint,
        content: String,
        original_text: String,
        font_size: f32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    /// 0-based, matching the render handle's page order.
    pub page_index: u16,
    pub shape: AnnotationShape,
}

impl Annotation {
    pub fn new(page_index: u16, shape: AnnotationShape) -> Self {
        Self { id: Uuid::new_v4(), page_index, shape }
    }

    /// Hit-testable bounds in page units. Text bounds are estimated the
    /// same way the serializer sizes its cover rectangles.
    pub fn bounds(&self) -> PageRect {
        match &self.shape {
            AnnotationShape::Highlight { rect, .. } | AnnotationShape::Signature { rect, .. } => {
                *rect
            }
            AnnotationShape::FreeText { position, content, font_size } => PageRect::new(
                position.x,
                position.y,
                estimated_text_width(content, *font_size),
                *font_size,
            ),
            AnnotationShape::TextEdit { position, content, original_text, font_size } => {
                let width = estimated_text_width(content, *font_size)
                    .max(estimated_text_width(original_text, *font_size));
                PageRect::new(position.x, position.y, width, *font_size)
            }
        }
    }

    /// Move the annotation so its bounds originate at `origin`.
    pub fn set_origin(&mut self, origin: PagePoint) {
        match &mut self.shape {
            AnnotationShape::Highlight { rect, .. } | AnnotationShape::Signature { rect, .. } => {
                *rect = rect.with_origin(origin);
            }
            AnnotationShape::FreeText { position, .. }
            | AnnotationShape::TextEdit { position, .. } => {
                *position = origin;
            }
        }
    }
}

/// Permanent annotations plus the pending drag-preview slot.
#[derive(Debug, Default)]
pub struct AnnotationStore {
    annotations: Vec<Annotation>,
    pending: Option<Annotation>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, annotation: Annotation) -> AnnotationId {
        let id = annotation.id;
        self.annotations.push(annotation);
        id
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: AnnotationId) -> Option<&mut Annotation> {
        self.annotations.iter_mut().find(|a| a.id == id)
    }

    /// Remove an annotation. Only reached by explicit user revert
    /// (Escape); the list is otherwise append-only until save.
    pub fn remove(&mut self, id: AnnotationId) -> Option<Annotation> {
        let index = self.annotations.iter().position(|a| a.id == id)?;
        Some(self.annotations.remove(index))
    }

    pub fn permanent(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn page_annotations(&self, page_index: u16) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.page_index == page_index)
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn clear(&mut self) {
        self.annotations.clear();
        self.pending = None;
    }

    /// Find an existing text edit for a run, matched by original text AND
    /// proximate position, so re-opening the inline editor pre-fills the
    /// edited content instead of the stale original.
    pub fn find_text_edit_mut(
        &mut self,
        page_index: u16,
        original: &str,
        near: PagePoint,
        tolerance: f32,
    ) -> Option<&mut Annotation> {
        self.annotations.iter_mut().find(|a| {
            a.page_index == page_index
                && match &a.shape {
                    AnnotationShape::TextEdit { position, original_text, .. } => {
                        original_text == original
                            && (position.x - near.x).abs() <= tolerance
                            && (position.y - near.y).abs() <= tolerance
                    }
                    _ => false,
                }
        })
    }

    // -- pending drag-preview slot -------------------------------------

    pub fn set_pending(&mut self, annotation: Annotation) {
        self.pending = Some(annotation);
    }

    pub fn pending(&self) -> Option<&Annotation> {
        self.pending.as_ref()
    }

    pub fn pending_mut(&mut self) -> Option<&mut Annotation> {
        self.pending.as_mut()
    }

    /// Drop the pending edit without committing it (drag cancelled).
    pub fn discard_pending(&mut self) -> Option<Annotation> {
        self.pending.take()
    }

    /// Commit the pending edit into the permanent list (drag released).
    pub fn promote_pending(&mut self) -> Option<AnnotationId> {
        let annotation = self.pending.take()?;
        Some(self.add(annotation))
    }

    // -- sidecar serialization -----------------------------------------

    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.annotations)
    }

    pub fn import_json(&mut self, json: &str) -> serde_json::Result<()> {
        self.annotations = serde_json::from_str(json)?;
        self.pending = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn highlight(page: u16, x: f32, y: f32) -> Annotation {
        Annotation::new(
            page,
            AnnotationShape::Highlight {
                rect: PageRect::new(x, y, 40.0, 12.0),
                color: Color::HIGHLIGHT_YELLOW,
            },
        )
    }

    #[test]
    fn store_is_append_only_per_page() {
        let mut store = AnnotationStore::new();
        store.add(highlight(0, 10.0, 10.0));
        store.add(highlight(1, 20.0, 20.0));
        store.add(highlight(0, 30.0, 30.0));

        assert_eq!(store.len(), 3);
        assert_eq!(store.page_annotations(0).count(), 2);
        assert_eq!(store.page_annotations(1).count(), 1);
    }

    #[test]
    fn text_edit_bounds_cover_longer_of_old_and_new() {
        let annotation = Annotation::new(
            0,
            AnnotationShape::TextEdit {
                position: PagePoint::new(50.0, 60.0),
                content: "Hi".into(),
                original_text: "Hello world".into(),
                font_size: 10.0,
            },
        );

        let bounds = annotation.bounds();
        assert_eq!(bounds.width, estimated_text_width("Hello world", 10.0));

        let grown = Annotation::new(
            0,
            AnnotationShape::TextEdit {
                position: PagePoint::new(50.0, 60.0),
                content: "a much longer replacement".into(),
                original_text: "Hi".into(),
                font_size: 10.0,
            },
        );
        assert_eq!(
            grown.bounds().width,
            estimated_text_width("a much longer replacement", 10.0)
        );
    }

    #[test]
    fn pending_promotes_exactly_once() {
        let mut store = AnnotationStore::new();
        store.set_pending(highlight(0, 1.0, 1.0));

        let id = store.promote_pending().expect("pending should promote");
        assert!(store.get(id).is_some());
        assert!(store.pending().is_none());
        assert!(store.promote_pending().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn discarded_pending_leaves_no_trace() {
        let mut store = AnnotationStore::new();
        store.set_pending(highlight(0, 1.0, 1.0));
        store.discard_pending();

        assert!(store.is_empty());
        assert!(store.pending().is_none());
    }

    #[test]
    fn finds_text_edit_by_text_and_proximity() {
        let mut store = AnnotationStore::new();
        store.add(Annotation::new(
            0,
            AnnotationShape::TextEdit {
                position: PagePoint::new(100.0, 200.0),
                content: "Goodbye".into(),
                original_text: "Hello".into(),
                font_size: 12.0,
            },
        ));

        let near = PagePoint::new(102.0, 198.5);
        let found = store.find_text_edit_mut(0, "Hello", near, 5.0);
        assert!(found.is_some());

        assert!(store.find_text_edit_mut(0, "Hello", PagePoint::new(150.0, 200.0), 5.0).is_none());
        assert!(store.find_text_edit_mut(0, "Other", near, 5.0).is_none());
        assert!(store.find_text_edit_mut(1, "Hello", near, 5.0).is_none());
    }

    #[test]
    fn sidecar_round_trip() {
        let mut store = AnnotationStore::new();
        store.add(highlight(2, 5.0, 6.0));
        store.add(Annotation::new(
            0,
            AnnotationShape::FreeText {
                position: PagePoint::new(10.0, 20.0),
                content: "note".into(),
                font_size: 14.0,
            },
        ));

        let json = store.export_json().expect("export");
        let mut restored = AnnotationStore::new();
        restored.import_json(&json).expect("import");

        assert_eq!(restored.permanent(), store.permanent());
    }
}
