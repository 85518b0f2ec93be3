//! Page/screen coordinate spaces and the transforms between them.
//!
//! Page coordinates are unscaled page units with a top-down y axis; screen
//! coordinates are surface pixels. Every pointer-to-page and
//! page-to-pixel conversion in the editor goes through [`PageToScreen`]
//! and its inverse so the zoom factor is always applied symmetrically.

use serde::{Deserialize, Serialize};

/// The fixed zoom ladder. `zoom_in`/`zoom_out` step along it.
pub const ZOOM_LADDER: [f32; 7] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 3.0];

/// Ladder index a fresh session starts at (100%).
pub const DEFAULT_ZOOM_INDEX: usize = 2;

/// A point in unscaled page units, y growing downward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PagePoint {
    pub x: f32,
    pub y: f32,
}

impl PagePoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A point in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in page units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PageRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from two drag corners, normalized so width and height are
    /// non-negative regardless of drag direction.
    pub fn from_corners(a: PagePoint, b: PagePoint) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn origin(&self) -> PagePoint {
        PagePoint::new(self.x, self.y)
    }

    pub fn with_origin(&self, origin: PagePoint) -> Self {
        Self { x: origin.x, y: origin.y, ..*self }
    }

    pub fn center(&self) -> PagePoint {
        PagePoint::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, point: PagePoint, margin: f32) -> bool {
        point.x >= self.x - margin
            && point.x <= self.x + self.width + margin
            && point.y >= self.y - margin
            && point.y <= self.y + self.height + margin
    }
}

/// Page units to surface pixels: `screen = page * zoom + offset`.
///
/// The offset carries the pan translation in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageToScreen {
    pub zoom: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl PageToScreen {
    pub fn new(zoom: f32, offset_x: f32, offset_y: f32) -> Self {
        Self { zoom, offset_x, offset_y }
    }

    pub fn apply(&self, point: PagePoint) -> ScreenPoint {
        ScreenPoint::new(
            point.x * self.zoom + self.offset_x,
            point.y * self.zoom + self.offset_y,
        )
    }

    pub fn apply_rect(&self, rect: PageRect) -> (f32, f32, f32, f32) {
        let origin = self.apply(rect.origin());
        (origin.x, origin.y, rect.width * self.zoom, rect.height * self.zoom)
    }

    /// The exact inverse transform, for pointer input.
    pub fn inverse(&self) -> ScreenToPage {
        ScreenToPage { zoom: self.zoom, offset_x: self.offset_x, offset_y: self.offset_y }
    }
}

/// Surface pixels to page units: `page = (screen - offset) / zoom`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenToPage {
    pub zoom: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl ScreenToPage {
    pub fn apply(&self, point: ScreenPoint) -> PagePoint {
        PagePoint::new(
            (point.x - self.offset_x) / self.zoom,
            (point.y - self.offset_y) / self.zoom,
        )
    }
}
