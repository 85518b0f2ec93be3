//! Cooperative cancellation for render tasks.
//!
//! A token is handed to each render task; the task checks it before and
//! after every expensive step and bails out quietly when it flips. Tokens
//! are tracked per page index so that a newer request for the same page can
//! cancel the outstanding one before it starts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared cancellation flag for one render task.
///
/// Clones observe the same underlying state. Cancelling is idempotent.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the token. Every clone observes the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Tracks the live cancellation token for each page with an active task.
///
/// At most one token is tracked per page index; registering a page that
/// already has a task cancels the previous token first, so two renders of
/// the same page can never both run to completion.
#[derive(Default)]
pub struct PageTaskTracker {
    tokens: Mutex<HashMap<u16, CancellationToken>>,
}

impl PageTaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task for `page_index` and return its token.
    ///
    /// Any previously registered token for the same page is cancelled.
    pub fn register(&self, page_index: u16) -> CancellationToken {
        let token = CancellationToken::new();
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stale) = tokens.insert(page_index, token.clone()) {
            tracing::debug!(page_index, "cancelling superseded render task");
            stale.cancel();
        }
        token
    }

    /// Track an externally created token for `page_index`, cancelling any
    /// previously tracked token for that page.
    pub fn adopt(&self, page_index: u16, token: CancellationToken) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stale) = tokens.insert(page_index, token) {
            tracing::debug!(page_index, "cancelling superseded render task");
            stale.cancel();
        }
    }

    /// Cancel the task tracked for `page_index`, if any.
    pub fn cancel(&self, page_index: u16) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        match tokens.get(&page_index) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked task. Used when the session closes.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Drop the tracking entry once a task has finished or been abandoned.
    pub fn unregister(&self, page_index: u16) -> bool {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.remove(&page_index).is_some()
    }

    pub fn is_tracked(&self, page_index: u16) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.contains_key(&page_index)
    }

    pub fn len(&self) -> usize {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
