//! Type-safe wrappers and error types for the vector index.
//!
//! Raw `f32`/`usize` values cross module boundaries only through these
//! newtypes so that dimensions, cluster ids and confidences cannot be mixed
//! up with row numbers or chunk counts.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RowIndex;

/// Output dimension of the all-MiniLM-L6-v2 model.
pub const VECTOR_DIMENSION_384: usize = 384;

/// Identifier of a k-means cluster in the inverted-file partition.
///
/// Cluster ids are 1-based so that zero never names a real cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterId(NonZeroU32);

impl ClusterId {
    /// Creates a new `ClusterId` from a non-zero u32.
    ///
    /// Returns `None` if the provided ID is zero.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Cluster id for the centroid at `index` in a centroid list.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add(index as u32))
    }

    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// Position of this cluster's centroid in a centroid list.
    #[must_use]
    pub fn index(&self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Similarity confidence in the range [0.0, 1.0].
///
/// Produced from cosine similarity by [`Score::from_cosine`]; 1.0 means the
/// vectors point the same way, 0.0 that they point in opposite directions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns an error if the score is not in the range [0.0, 1.0] or is NaN.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score must be in range [0.0, 1.0]",
            });
        }
        Ok(Self(value))
    }

    /// Maps a cosine similarity in [-1, 1] onto [0, 1] with `(cos + 1) / 2`.
    ///
    /// Rounding noise outside [-1, 1] is clamped and NaN maps to zero.
    #[must_use]
    pub fn from_cosine(cosine: f32) -> Self {
        if cosine.is_nan() {
            return Self::zero();
        }
        Self(((cosine + 1.0) / 2.0).clamp(0.0, 1.0))
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Type-safe wrapper for vector dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl TryFrom<usize> for VectorDimension {
    type Error = VectorError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VectorDimension> for usize {
    fn from(value: VectorDimension) -> Self {
        value.0
    }
}

/// One search hit: a row of the vector matrix and its confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub row: RowIndex,
    pub confidence: Score,
}

/// Old row → new row mapping produced by compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowRemap {
    mapping: Vec<Option<RowIndex>>,
}

impl RowRemap {
    pub(crate) fn with_capacity(rows: usize) -> Self {
        Self {
            mapping: Vec::with_capacity(rows),
        }
    }

    pub(crate) fn push(&mut self, new_row: Option<RowIndex>) {
        self.mapping.push(new_row);
    }

    /// New position of `old`, or `None` when the row was dropped.
    #[must_use]
    pub fn get(&self, old: RowIndex) -> Option<RowIndex> {
        self.mapping.get(old.as_usize()).copied().flatten()
    }

    /// Number of rows that survived compaction.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.mapping.iter().filter(|row| row.is_some()).count()
    }

    /// Number of rows compaction dropped.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.mapping.len() - self.retained()
    }

    /// Number of rows in the index before compaction.
    #[must_use]
    pub fn old_len(&self) -> usize {
        self.mapping.len()
    }
}

/// Errors that can occur during vector operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid score value: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Row {row} is out of bounds for an index of {len} rows")]
    RowOutOfBounds { row: u32, len: usize },

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingFailed(String),

    #[error(
        "Clustering failed: {0}\nSuggestion: Ensure sufficient vectors are available for clustering (minimum: k clusters)"
    )]
    ClusteringFailed(String),

    #[error("Invalid vector data: {0}\nSuggestion: Check that vector data is valid and not corrupted")]
    InvalidFormat(String),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with this version of vaultdex"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Operation cancelled")]
    Cancelled,
}
