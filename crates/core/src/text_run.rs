//! Text runs as the editor sees them, plus position-bucket deduplication.
//!
//! PDFs routinely emit the same visual line several times (overprint,
//! fill-then-stroke, layered form fields). Runs whose positions land in
//! the same bucket are collapsed to one entry; the later occurrence wins
//! because it is the one the viewer actually sees on top.

use std::collections::HashMap;

use redline_engine::TextRunInfo;

use crate::transform::{PagePoint, PageRect};

/// One extracted text run in top-down page coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub page_index: u16,
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub font_size: f32,
    pub font_name: String,
}

impl TextRun {
    pub fn from_info(page_index: u16, info: TextRunInfo) -> Self {
        Self {
            page_index,
            text: info.text,
            x: info.x,
            y: info.y,
            width: info.width,
            height: info.height,
            font_size: info.font_size,
            font_name: info.font_name,
        }
    }

    pub fn origin(&self) -> PagePoint {
        PagePoint::new(self.x, self.y)
    }

    pub fn bounds(&self) -> PageRect {
        PageRect::new(self.x, self.y, self.width, self.height)
    }
}

/// Collapse runs that occupy the same position bucket, keeping document
/// order for the survivors. A later duplicate replaces the earlier run
/// in place rather than moving to the end.
pub fn dedup_runs(runs: Vec<TextRun>, tolerance: f32) -> Vec<TextRun> {
    if tolerance <= 0.0 {
        return runs;
    }

    let mut kept: Vec<TextRun> = Vec::with_capacity(runs.len());
    let mut slot_by_bucket: HashMap<(i64, i64), usize> = HashMap::new();

    for run in runs {
        let bucket = (
            (run.x / tolerance).round() as i64,
            (run.y / tolerance).round() as i64,
        );
        match slot_by_bucket.get(&bucket) {
            Some(&slot) => kept[slot] = run,
            None => {
                slot_by_bucket.insert(bucket, kept.len());
                kept.push(run);
            }
        }
    }

    kept
}
