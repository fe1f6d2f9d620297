//! Saving and loading the index.
//!
//! A persisted index is four artifacts: the registry snapshot, the pointer
//! table, the vector matrix bytes and the metadata. [`PersistenceAdapter`]
//! moves them as one [`PersistedState`]; running without an adapter keeps
//! the index purely in memory.

mod file;
mod metadata;

use std::ops::Deref;
use std::path::PathBuf;

use parking_lot::Mutex;
use thiserror::Error;

use crate::registry::{PointerEntry, RegistryError, RegistrySnapshot};
use crate::vector::{MappedMatrix, VectorError};

pub use file::FilePersistence;
pub use metadata::{INDEX_FORMAT_VERSION, IndexMetadata};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize {what}: {source}")]
    Encode {
        what: &'static str,
        source: serde_json::Error,
    },

    #[error("Index at '{path}' is incomplete: {missing} is missing")]
    Incomplete { path: PathBuf, missing: &'static str },

    #[error("'{path}' does not name an index generation: {value:?}")]
    BadPointer { path: PathBuf, value: String },

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Vector matrix bytes, either owned or mapped from disk.
#[derive(Debug)]
pub enum VectorBytes {
    Owned(Vec<u8>),
    Mapped(MappedMatrix),
}

impl Deref for VectorBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            VectorBytes::Owned(bytes) => bytes.as_slice(),
            VectorBytes::Mapped(mapped) => &mapped[..],
        }
    }
}

impl From<Vec<u8>> for VectorBytes {
    fn from(bytes: Vec<u8>) -> Self {
        VectorBytes::Owned(bytes)
    }
}

/// Everything needed to restore an index.
#[derive(Debug)]
pub struct PersistedState {
    pub registry: RegistrySnapshot,
    pub pointers: Vec<PointerEntry>,
    pub vectors: VectorBytes,
    pub metadata: IndexMetadata,
}

/// Storage backend for [`PersistedState`].
pub trait PersistenceAdapter: Send + Sync {
    /// Replaces any previously saved state.
    fn save(&self, state: &PersistedState) -> Result<(), PersistenceError>;

    /// Loads the saved state, `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<PersistedState>, PersistenceError>;
}

/// Keeps the last saved state in memory. Useful for tests and for
/// snapshotting an index without touching disk.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saved: Mutex<Option<SavedCopy>>,
}

#[derive(Debug, Clone)]
struct SavedCopy {
    registry: RegistrySnapshot,
    pointers: Vec<PointerEntry>,
    vectors: Vec<u8>,
    metadata: IndexMetadata,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_state(&self) -> bool {
        self.saved.lock().is_some()
    }
}

impl PersistenceAdapter for MemoryPersistence {
    fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        *self.saved.lock() = Some(SavedCopy {
            registry: state.registry.clone(),
            pointers: state.pointers.clone(),
            vectors: state.vectors.to_vec(),
            metadata: state.metadata.clone(),
        });
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        Ok(self.saved.lock().clone().map(|copy| PersistedState {
            registry: copy.registry,
            pointers: copy.pointers,
            vectors: copy.vectors.into(),
            metadata: copy.metadata,
        }))
    }
}
