//! Editor tuning knobs with production defaults.

use std::time::Duration;

use crate::annotation::Color;

/// Tunable editor behavior. Defaults match production; tests tighten or
/// loosen individual knobs through the builder methods.
#[derive(Debug, Clone)]
pub struct EditorConfig {
    /// Position-bucket size for text run dedup, in page units.
    pub dedup_tolerance: f32,
    /// Drags smaller than this in either dimension create no highlight.
    pub min_highlight_size: f32,
    /// Slack around block rects when hit-testing pointer positions.
    pub hit_test_margin: f32,
    /// Font size for free text and text edits, in page units.
    pub default_text_size: f32,
    /// Placed signature extent (width, height) in page units.
    pub signature_size: (f32, f32),
    /// Minimum interval between processed drag-move events.
    pub drag_throttle: Duration,
    /// Padding added around text-edit cover rectangles at save time.
    pub cover_padding: f32,
    pub highlight_color: Color,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            dedup_tolerance: 5.0,
            min_highlight_size: 5.0,
            hit_test_margin: 3.0,
            default_text_size: 14.0,
            signature_size: (160.0, 60.0),
            drag_throttle: Duration::from_millis(16),
            cover_padding: 2.0,
            highlight_color: Color::HIGHLIGHT_YELLOW,
        }
    }
}

impl EditorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dedup_tolerance(mut self, tolerance: f32) -> Self {
        self.dedup_tolerance = tolerance;
        self
    }

    pub fn with_min_highlight_size(mut self, size: f32) -> Self {
        self.min_highlight_size = size;
        self
    }

    pub fn with_hit_test_margin(mut self, margin: f32) -> Self {
        self.hit_test_margin = margin;
        self
    }

    pub fn with_default_text_size(mut self, size: f32) -> Self {
        self.default_text_size = size;
        self
    }

    pub fn with_signature_size(mut self, width: f32, height: f32) -> Self {
        self.signature_size = (width, height);
        self
    }

    pub fn with_drag_throttle(mut self, interval: Duration) -> Self {
        self.drag_throttle = interval;
        self
    }

    pub fn with_highlight_color(mut self, color: Color) -> Self {
        self.highlight_color = color;
        self
    }
}
