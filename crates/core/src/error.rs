//! Editor error taxonomy.
//!
//! Cancellations are part of normal operation and are filtered before
//! anything reaches the user; everything else maps to one of the
//! recoverable categories below.

use redline_engine::EngineError;

use crate::save::SaveError;

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    /// Fetch or parse failure while opening a document. Recoverable: the
    /// shell shows a retry path.
    #[error("document load failed: {0}")]
    Load(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A render task observed its cancellation token. Expected during
    /// rapid page/zoom changes; never logged as an error, never surfaced.
    #[error("render cancelled")]
    RenderCancelled,

    /// Non-cancellation render failure. Logged; the page shows an error
    /// state while the rest of the document stays usable.
    #[error("render failed: {0}")]
    Render(String),

    #[error(transparent)]
    Save(#[from] SaveError),

    /// The upload collaborator rejected the saved document. Blocking, but
    /// annotations are preserved so the user can retry.
    #[error("upload failed: {0}")]
    Upload(String),

    #[error("session is closed")]
    Closed,
}

impl EditorError {
    /// Expected-cancellation errors are filtered from logs and UI.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::RenderCancelled)
    }
}

pub type EditorResult<T> = Result<T, EditorError>;
