//! Document fetching, the refcounted byte registry, and stale-load
//! suppression.
//!
//! A load produces two independent copies of the fetched bytes: one is
//! consumed by the render engine (which may mutate or take ownership of
//! its buffer), the other is kept pristine for the save path. The save
//! path never reads engine state.
//!
//! The registry caches fetched bytes by URL with explicit acquire/release
//! refcounts so two sessions on the same document share one fetch, and
//! the entry can be dropped once the last session closes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use redline_storage::ByteSource;

use crate::error::{EditorError, EditorResult};

/// A successfully loaded document with its two byte buffers.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub url: String,
    pub filename: String,
    /// Buffer handed to the render engine. May be consumed.
    pub render_bytes: Vec<u8>,
    /// Pristine copy reserved for serialization.
    pub original_bytes: Vec<u8>,
}

struct RegistryEntry {
    bytes: Arc<Vec<u8>>,
    refcount: usize,
}

/// Refcounted byte cache keyed by URL.
pub struct DocumentRegistry {
    source: Box<dyn ByteSource>,
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl DocumentRegistry {
    pub fn new(source: Box<dyn ByteSource>) -> Self {
        Self { source, entries: Mutex::new(HashMap::new()) }
    }

    /// Fetch (or reuse) the bytes for `url` and take a reference on them.
    /// Every successful acquire must be paired with a [`release`].
    ///
    /// [`release`]: DocumentRegistry::release
    pub fn acquire(&self, url: &str) -> EditorResult<Arc<Vec<u8>>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(url) {
            entry.refcount += 1;
            debug!(url, refcount = entry.refcount, "registry hit");
            return Ok(Arc::clone(&entry.bytes));
        }
        drop(entries);

        let bytes = self
            .source
            .fetch(url)
            .map_err(|e| EditorError::Load(e.to_string()))?;
        let bytes = Arc::new(bytes);

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .entry(url.to_owned())
            .or_insert_with(|| RegistryEntry { bytes: Arc::clone(&bytes), refcount: 0 });
        entry.refcount += 1;
        debug!(url, refcount = entry.refcount, "registry fill");
        Ok(Arc::clone(&entry.bytes))
    }

    /// Drop one reference. The entry itself stays cached until [`trim`]
    /// sweeps zero-refcount entries.
    ///
    /// [`trim`]: DocumentRegistry::trim
    pub fn release(&self, url: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(url) {
            entry.refcount = entry.refcount.saturating_sub(1);
        }
    }

    pub fn refcount(&self, url: &str) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(url).map(|e| e.refcount).unwrap_or(0)
    }

    /// Evict entries no session holds a reference to.
    pub fn trim(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|url, entry| {
            if entry.refcount == 0 {
                debug!(url, "registry evict");
                false
            } else {
                true
            }
        });
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DocumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRegistry").field("cached", &self.len()).finish()
    }
}

/// Ticket for one load attempt. Resolving a ticket after a newer load
/// began yields `None` and releases the fetched bytes.
#[derive(Debug)]
pub struct LoadTicket {
    url: String,
    generation: u64,
}

/// Issues load tickets and suppresses stale completions. Starting a new
/// load (or cancelling) bumps the generation so any in-flight older load
/// resolves to nothing instead of clobbering the newer document.
pub struct DocumentLoader {
    registry: Arc<DocumentRegistry>,
    generation: AtomicU64,
}

impl DocumentLoader {
    pub fn new(registry: Arc<DocumentRegistry>) -> Self {
        Self { registry, generation: AtomicU64::new(0) }
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub fn begin(&self, url: &str) -> LoadTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        LoadTicket { url: url.to_owned(), generation }
    }

    /// Invalidate all outstanding tickets.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Complete a ticket: fetch the bytes and build the two buffers.
    /// Returns `Ok(None)` when the ticket was superseded.
    pub fn resolve(&self, ticket: LoadTicket) -> EditorResult<Option<LoadedDocument>> {
        let shared = self.registry.acquire(&ticket.url)?;

        if self.generation.load(Ordering::SeqCst) != ticket.generation {
            debug!(url = %ticket.url, "stale load discarded");
            self.registry.release(&ticket.url);
            return Ok(None);
        }

        Ok(Some(LoadedDocument {
            filename: filename_from_url(&ticket.url),
            render_bytes: shared.as_ref().clone(),
            original_bytes: shared.as_ref().clone(),
            url: ticket.url,
        }))
    }
}

fn filename_from_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if name.is_empty() { "document.pdf".to_owned() } else { name.to_owned() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redline_storage::MemorySource;

    fn registry_with(url: &str, bytes: &[u8]) -> Arc<DocumentRegistry> {
        let source = MemorySource::new();
        source.insert(url, bytes.to_vec());
        Arc::new(DocumentRegistry::new(Box::new(source)))
    }

    #[test]
    fn acquire_release_tracks_refcounts() {
        let registry = registry_with("doc", b"%PDF");

        registry.acquire("doc").expect("first acquire");
        registry.acquire("doc").expect("second acquire");
        assert_eq!(registry.refcount("doc"), 2);

        registry.release("doc");
        assert_eq!(registry.refcount("doc"), 1);

        registry.trim();
        assert_eq!(registry.len(), 1);

        registry.release("doc");
        registry.trim();
        assert!(registry.is_empty());
    }

    #[test]
    fn load_produces_two_independent_buffers() {
        let registry = registry_with("a/b/report.pdf", b"%PDF-original");
        let loader = DocumentLoader::new(registry);

        let ticket = loader.begin("a/b/report.pdf");
        let loaded = loader
            .resolve(ticket)
            .expect("resolve")
            .expect("ticket is current");

        assert_eq!(loaded.filename, "report.pdf");
        assert_eq!(loaded.render_bytes, loaded.original_bytes);

        // Mutating one buffer must not touch the other.
        let mut render = loaded.render_bytes;
        render[0] = b'X';
        assert_eq!(loaded.original_bytes[0], b'%');
    }

    #[test]
    fn superseded_ticket_resolves_to_none() {
        let registry = registry_with("doc", b"%PDF");
        let loader = DocumentLoader::new(Arc::clone(&registry));

        let stale = loader.begin("doc");
        let fresh = loader.begin("doc");

        assert!(loader.resolve(stale).expect("resolve").is_none());
        assert!(loader.resolve(fresh).expect("resolve").is_some());

        // The stale resolve released its reference.
        assert_eq!(registry.refcount("doc"), 1);
    }

    #[test]
    fn cancel_invalidates_outstanding_tickets() {
        let registry = registry_with("doc", b"%PDF");
        let loader = DocumentLoader::new(registry);

        let ticket = loader.begin("doc");
        loader.cancel();
        assert!(loader.resolve(ticket).expect("resolve").is_none());
    }

    #[test]
    fn missing_document_is_a_load_error() {
        let registry = Arc::new(DocumentRegistry::new(Box::new(MemorySource::new())));
        let loader = DocumentLoader::new(registry);

        let ticket = loader.begin("nope");
        let err = loader.resolve(ticket).expect_err("should fail");
        assert!(matches!(err, EditorError::Load(_)));
    }
}
