//! Metadata describing how a persisted index was built.

use serde::{Deserialize, Serialize};

use crate::indexing::get_utc_timestamp;

/// Version of the on-disk layout.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Metadata about the index state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Version of the index format
    pub version: u32,

    /// Embedding model that produced the vectors
    pub model_name: String,

    /// Vector dimension, absent until the first vector is stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,

    /// Chunk size and overlap the rows were cut with. Stored chunk indices
    /// only make sense under the same values.
    pub chunk_size: usize,
    pub overlap: usize,

    /// Number of live documents
    pub document_count: usize,

    /// Number of rows in the vector matrix, tombstoned ones included
    pub total_chunks: u32,

    pub created_at: u64,

    /// Last modification timestamp
    pub last_modified: u64,
}

impl IndexMetadata {
    pub fn new(model_name: impl Into<String>, chunk_size: usize, overlap: usize) -> Self {
        let now = get_utc_timestamp();
        Self {
            version: INDEX_FORMAT_VERSION,
            model_name: model_name.into(),
            dimension: None,
            chunk_size,
            overlap,
            document_count: 0,
            total_chunks: 0,
            created_at: now,
            last_modified: now,
        }
    }

    /// Update counts and bump the modification time
    pub fn update_counts(&mut self, document_count: usize, total_chunks: u32) {
        self.document_count = document_count;
        self.total_chunks = total_chunks;
        self.last_modified = get_utc_timestamp();
    }
}
