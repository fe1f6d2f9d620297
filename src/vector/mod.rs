//! Vector storage and similarity search for document chunks.
//!
//! # Architecture
//! Chunk embeddings live in one append-only matrix ([`VectorIndex`]) whose
//! row number is the global chunk id. Small indexes are scanned in full;
//! larger ones are partitioned with k-means into an inverted file (IVF) so a
//! query only scores the rows of the clusters nearest to it. The matrix
//! serializes to a flat little-endian format that is memory-mapped on load.

mod clustering;
mod embedding;
mod index;
mod storage;
mod types;

pub use clustering::{
    ClusteringError, KMeansResult, assign_to_nearest_centroid, cosine_similarity, kmeans_clustering,
};
pub use embedding::{
    EmbeddingGateway, FastEmbedGateway, HASHING_MODEL_NAME, HashingEmbedder, create_gateway,
    parse_embedding_model,
};
pub use index::{PartitionConfig, TrainedPartition, VectorIndex};
pub use storage::{MappedMatrix, MatrixHeader, STORAGE_VERSION, read_header};
pub use types::{
    ClusterId, Neighbor, RowRemap, Score, VECTOR_DIMENSION_384, VectorDimension, VectorError,
};
