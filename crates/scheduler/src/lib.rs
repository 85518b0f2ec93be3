//! Render scheduling primitives for the editor.
//!
//! Two concerns live here: cooperative cancellation tokens (with per-page
//! tracking so an outstanding render can be cancelled when a newer request
//! targets the same page) and the render queue that serializes every
//! rasterization request so exactly one render is active at a time.

mod cancel;
mod queue;

pub use cancel::{CancellationToken, PageTaskTracker};
pub use queue::{JobId, RenderJob, RenderJobKey, RenderKind, RenderParams, RenderQueue};
