//! Interactive content blocks and hit-testing.
//!
//! A block is anything the pointer can land on: an extracted text run or
//! a placed annotation. The index is rebuilt atomically from the current
//! runs and store, never patched incrementally except for the one case a
//! drag needs (moving a single block under the cursor without paying for
//! a rebuild per move event).

use uuid::Uuid;

use crate::annotation::{Annotation, AnnotationStore};
use crate::text_run::TextRun;
use crate::transform::{PagePoint, PageRect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Annotation,
}

/// What a block refers back to: an index into the deduped run list, or a
/// stored annotation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    Run(usize),
    Annotation(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub source: BlockSource,
    pub page_index: u16,
    pub rect: PageRect,
    pub kind: BlockKind,
}

/// Hit-test index for one page. Runs come first, annotations after, so a
/// reverse scan finds annotations before the text they cover.
#[derive(Debug, Default)]
pub struct BlockIndex {
    blocks: Vec<ContentBlock>,
    /// While a drag is in progress rebuilds are suppressed so the block
    /// list stays stable under the cursor.
    frozen: bool,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Replace the whole index from the current runs and annotations for
    /// one page. No-op while frozen.
    pub fn rebuild(&mut self, page_index: u16, runs: &[TextRun], store: &AnnotationStore) {
        if self.frozen {
            return;
        }
        self.blocks.clear();

        for (i, run) in runs.iter().enumerate() {
            if run.page_index != page_index {
                continue;
            }
            self.blocks.push(ContentBlock {
                source: BlockSource::Run(i),
                page_index,
                rect: run.bounds(),
                kind: BlockKind::Text,
            });
        }

        for annotation in store.page_annotations(page_index) {
            self.blocks.push(block_for(annotation));
        }
    }

    /// Move one block's rect during a drag, bypassing the freeze.
    pub fn patch(&mut self, source: BlockSource, origin: PagePoint) {
        if let Some(block) = self.blocks.iter_mut().find(|b| b.source == source) {
            block.rect = block.rect.with_origin(origin);
        }
    }

    /// Topmost block under `point`. Annotations sit above text runs.
    pub fn hit_test(&self, point: PagePoint, margin: f32) -> Option<&ContentBlock> {
        self.blocks.iter().rev().find(|b| b.rect.contains(point, margin))
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn block_for(annotation: &Annotation) -> ContentBlock {
    ContentBlock {
        source: BlockSource::Annotation(annotation.id),
        page_index: annotation.page_index,
        rect: annotation.bounds(),
        kind: BlockKind::Annotation,
    }
}
