//! Editor core: document sessions, annotations and the save pipeline.
//!
//! A [`DocumentSession`] owns one open document end to end: the pristine
//! original bytes, the render backend over a second copy, the extracted
//! text runs, the annotation store and the render queue. The
//! [`ToolController`] layers pointer gestures and the inline text editor
//! on top. [`save::serialize`] flattens committed annotations over the
//! original bytes into the final document.

pub mod annotation;
pub mod block;
pub mod config;
pub mod error;
pub mod interaction;
pub mod loader;
pub mod overlay;
pub mod save;
pub mod session;
pub mod text_run;
pub mod transform;

pub use annotation::{Annotation, AnnotationId, AnnotationShape, AnnotationStore, Color};
pub use block::{BlockIndex, BlockKind, BlockSource, ContentBlock};
pub use config::EditorConfig;
pub use error::{EditorError, EditorResult};
pub use interaction::{Effect, Key, Tool, ToolController};
pub use loader::{DocumentLoader, DocumentRegistry, LoadTicket, LoadedDocument};
pub use save::SaveError;
pub use session::DocumentSession;
pub use text_run::{dedup_runs, TextRun};
pub use transform::{
    PagePoint, PageRect, PageToScreen, ScreenPoint, ScreenToPage, DEFAULT_ZOOM_INDEX, ZOOM_LADDER,
};
