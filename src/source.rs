//! Where document text comes from.
//!
//! The index never stores chunk text. Search results re-read the document
//! through a [`SourceProvider`] and re-slice the chunk, so a provider must
//! return the current content of a path every time it is asked.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// Reads document text by path.
pub trait SourceProvider: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;

    /// Path under which a document is registered. Two spellings of the
    /// same document must map to the same key.
    fn document_key(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

/// Reads files from disk. Relative paths resolve against `root`.
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// `path` relative to the root, or unchanged when it lies outside it.
    pub fn relativize(&self, path: &Path) -> PathBuf {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.strip_prefix(".").unwrap_or(relative).to_path_buf()
    }
}

impl SourceProvider for FsSource {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(path))
    }

    fn document_key(&self, path: &Path) -> PathBuf {
        self.relativize(path)
    }
}

/// In-memory documents keyed by path.
#[derive(Debug, Default)]
pub struct MemorySource {
    documents: RwLock<HashMap<PathBuf, String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.documents.write().insert(path.into(), content.into());
    }

    pub fn remove(&self, path: &Path) -> Option<String> {
        self.documents.write().remove(path)
    }
}

impl SourceProvider for MemorySource {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.documents.read().get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no in-memory document for {}", path.display()),
            )
        })
    }
}
