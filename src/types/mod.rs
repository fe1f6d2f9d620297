use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an indexed document.
///
/// Ids are allocated monotonically starting at zero and are never reused,
/// not even after garbage collection drops the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u32);

impl DocumentId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Convert to the underlying u32 value
    pub fn to_u32(self) -> u32 {
        self.0
    }

    /// The id that follows this one, or `None` once the id space is exhausted.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a chunk vector inside the vector matrix.
///
/// Row indices are stable until the next garbage collection, which is the
/// only operation allowed to renumber them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowIndex(pub u32);

impl RowIndex {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RowIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of indexing a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingResult {
    /// Document was indexed under a new id
    Indexed(DocumentId),
    /// Content hash matched the live document, nothing was done
    Unchanged(DocumentId),
}

impl IndexingResult {
    pub fn document_id(&self) -> DocumentId {
        match self {
            IndexingResult::Indexed(id) => *id,
            IndexingResult::Unchanged(id) => *id,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, IndexingResult::Unchanged(_))
    }
}
