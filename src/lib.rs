//! vaultdex: semantic search over a growing collection of notes.
//!
//! Notes are cut into overlapping character windows, embedded, and stored
//! as rows of one vector matrix. Queries return the closest chunks,
//! re-read from the notes themselves. Deletions are tombstones until a
//! garbage collection compacts the matrix.

pub mod chunking;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod gc;
pub mod indexing;
pub mod persistence;
pub mod registry;
pub mod source;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use chunking::{Chunk, ChunkConfig, ChunkingError};
pub use config::Settings;
pub use engine::{IndexStats, RetrievalEngine, SimilarityResult};
pub use error::{IndexError, IndexResult};
pub use gc::GcReport;
pub use indexing::{BulkReport, FileWalker, calculate_hash};
pub use persistence::{FilePersistence, MemoryPersistence, PersistenceAdapter};
pub use registry::{DocumentRecord, DocumentRegistry, PointerEntry};
pub use source::{FsSource, MemorySource, SourceProvider};
pub use types::{DocumentId, IndexingResult, RowIndex};
pub use vector::{EmbeddingGateway, HashingEmbedder, VectorIndex};
