//! External collaborator seams.
//!
//! The editor core never talks to buckets, databases or signature pads
//! directly. It fetches raw bytes through [`ByteSource`], hands finished
//! documents to an [`UploadSink`] and obtains signature images from a
//! [`SignatureProvider`]. Everything behind these traits is someone else's
//! system.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub const PDF_MIME: &str = "application/pdf";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A finished document ready for the upload collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedDocument {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime: &'static str,
}

impl SavedDocument {
    pub fn pdf(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self { bytes, filename: filename.into(), mime: PDF_MIME }
    }
}

/// Resolves a document URL to raw bytes.
pub trait ByteSource: Send + Sync {
    fn fetch(&self, url: &str) -> StorageResult<Vec<u8>>;
}

/// Receives a saved document ("upload and attach" collaborator).
pub trait UploadSink: Send + Sync {
    fn upload(&self, document: &SavedDocument) -> StorageResult<()>;
}

/// Signature capture collaborator. Returns a base64-encoded PNG, or `None`
/// when the user cancelled capture.
pub trait SignatureProvider: Send + Sync {
    fn capture(&self) -> Option<String>;
}

/// Filesystem-backed source: URLs resolve to paths under a root directory.
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let relative = url.strip_prefix("file://").unwrap_or(url);
        self.root.join(relative.trim_start_matches('/'))
    }
}

impl ByteSource for FsSource {
    fn fetch(&self, url: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve(url);
        if !path.exists() {
            return Err(StorageError::NotFound(url.to_owned()));
        }
        Ok(std::fs::read(path)?)
    }
}

/// In-memory source, used by tests and by callers that already hold bytes.
#[derive(Debug, Default)]
pub struct MemorySource {
    documents: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.insert(url.into(), bytes);
    }
}

impl ByteSource for MemorySource {
    fn fetch(&self, url: &str) -> StorageResult<Vec<u8>> {
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents
            .get(url)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(url.to_owned()))
    }
}

/// Writes uploads into a directory. The production system attaches the
/// file to a record instead; the editor cannot tell the difference.
#[derive(Debug, Clone)]
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl UploadSink for DirSink {
    fn upload(&self, document: &SavedDocument) -> StorageResult<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.root.join(&document.filename), &document.bytes)?;
        Ok(())
    }
}
