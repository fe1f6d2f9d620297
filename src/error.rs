//! Error types for the note index.
//!
//! Each component has its own `thiserror` enum; they all convert into
//! [`IndexError`], the type returned by the public engine API.

use std::path::PathBuf;

use thiserror::Error;

use crate::chunking::ChunkingError;
use crate::persistence::PersistenceError;
use crate::registry::RegistryError;
use crate::vector::VectorError;

/// Main error type for indexing and retrieval operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error(
        "Vector dimension mismatch: index holds {expected}-dimensional vectors, got {actual}"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("{item} not found")]
    NotFound { item: String },

    #[error("Embedding model unavailable: {reason}")]
    EmbeddingUnavailable { reason: String },

    #[error("No documents indexed yet.")]
    NoDocumentsIndexed,

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to persist index: {0}")]
    Persistence(#[source] PersistenceError),

    #[error("Index appears to be corrupted: {reason}")]
    IndexCorrupted { reason: String },

    #[error("Index capacity exhausted: {reason}")]
    CapacityExhausted { reason: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl IndexError {
    /// Get a stable status code for this error type.
    ///
    /// Used in `--json` output for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::EmbeddingUnavailable { .. } => "EMBEDDING_UNAVAILABLE",
            Self::NoDocumentsIndexed => "NO_DOCUMENTS_INDEXED",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::IndexCorrupted { .. } => "INDEX_CORRUPTED",
            Self::CapacityExhausted { .. } => "CAPACITY_EXHAUSTED",
            Self::Cancelled => "CANCELLED",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::InvalidConfiguration { .. } => vec![
                "Check .vaultdex/settings.toml and VAULTDEX_* environment variables",
                "Run 'vaultdex config' to see the effective configuration",
                "Run 'vaultdex index --rebuild <path>' to rebuild the index with the current settings",
            ],
            Self::DimensionMismatch { .. } => vec![
                "The index was built with a different embedding model",
                "Run 'vaultdex index --rebuild <path>' to rebuild it with the current model",
            ],
            Self::NoDocumentsIndexed => vec!["Run 'vaultdex index <path>' to add notes first"],
            Self::EmbeddingUnavailable { .. } => vec![
                "Ensure you have internet connection for first-time model download",
                "Set embedding.model = \"hashing\" to work fully offline",
            ],
            Self::IndexCorrupted { .. } => vec![
                "Delete the index directory and run 'vaultdex index' to rebuild from scratch",
                "Check for disk errors or filesystem corruption",
            ],
            Self::Persistence(_) => vec![
                "Check disk space and permissions in the index directory",
                "The previous on-disk index is left intact when a save fails",
            ],
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Run 'vaultdex sync' to drop notes that were deleted",
            ],
            Self::CapacityExhausted { .. } => vec![
                "Run 'vaultdex compact' to reclaim rows of deleted notes",
            ],
            _ => vec![],
        }
    }

    /// Errors after which the in-memory index must not be used further.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IndexCorrupted { .. } | Self::InvalidConfiguration { .. }
        )
    }

    /// Errors that may succeed when the same call is repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable { .. } | Self::FileRead { .. } | Self::Persistence(_)
        )
    }
}

impl From<ChunkingError> for IndexError {
    fn from(err: ChunkingError) -> Self {
        Self::InvalidConfiguration {
            reason: err.to_string(),
        }
    }
}

impl From<VectorError> for IndexError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            VectorError::InvalidArgument(reason) => Self::InvalidArgument { reason },
            VectorError::EmbeddingFailed(reason) => Self::EmbeddingUnavailable { reason },
            VectorError::InvalidDimension { .. } => Self::InvalidConfiguration {
                reason: err.to_string(),
            },
            VectorError::Cancelled => Self::Cancelled,
            VectorError::InvalidFormat(_) | VectorError::VersionMismatch { .. } => {
                Self::IndexCorrupted {
                    reason: err.to_string(),
                }
            }
            other => Self::Persistence(PersistenceError::Vector(other)),
        }
    }
}

impl From<RegistryError> for IndexError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DocumentNotFound(id) => Self::NotFound {
                item: format!("Document {id}"),
            },
            RegistryError::RowNotFound { row, .. } => Self::NotFound {
                item: format!("Owner of vector row {row}"),
            },
            RegistryError::IdsExhausted | RegistryError::RowsExhausted => {
                Self::CapacityExhausted {
                    reason: err.to_string(),
                }
            }
            RegistryError::Corrupted(reason) => Self::IndexCorrupted { reason },
        }
    }
}

impl From<PersistenceError> for IndexError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Registry(inner) => inner.into(),
            PersistenceError::Vector(
                inner @ (VectorError::InvalidFormat(_) | VectorError::VersionMismatch { .. }),
            ) => inner.into(),
            bad @ PersistenceError::BadPointer { .. } => Self::IndexCorrupted {
                reason: bad.to_string(),
            },
            other => Self::Persistence(other),
        }
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;
