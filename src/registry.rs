//! Document registry: path ⇄ document id ⇄ first vector row.
//!
//! Every indexed document owns a contiguous run of rows in the vector
//! matrix. The pointer table records where each run starts, ordered by
//! start row, so the owner of any row is found by binary search. Documents
//! without chunks own no rows and get no pointer entry, which keeps the
//! starts strictly increasing.
//!
//! Tombstoning only marks a document dead. Its rows keep their positions
//! until garbage collection rebuilds the registry from the live documents.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::indexing::get_utc_timestamp;
use crate::types::{DocumentId, RowIndex};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Document {0} is not registered")]
    DocumentNotFound(DocumentId),

    #[error("Row {row} is not owned by any document (index holds {total_chunks} rows)")]
    RowNotFound { row: RowIndex, total_chunks: u32 },

    #[error("Document id space exhausted\nSuggestion: Rebuild the index from scratch")]
    IdsExhausted,

    #[error("Vector row space exhausted\nSuggestion: Run garbage collection or rebuild the index")]
    RowsExhausted,

    #[error("Registry snapshot is inconsistent: {0}")]
    Corrupted(String),
}

/// Everything the registry knows about one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub path: PathBuf,
    /// First vector row owned by the document
    pub chunk_offset_start: u32,
    pub chunk_count: u32,
    /// SHA-256 of the content that was indexed, hex encoded
    pub content_hash: String,
    /// UTC seconds since the epoch
    pub indexed_at: u64,
}

impl DocumentRecord {
    /// Rows owned by this document.
    pub fn rows(&self) -> std::ops::Range<u32> {
        self.chunk_offset_start..self.chunk_offset_start + self.chunk_count
    }
}

/// One entry of the pointer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerEntry {
    pub document_id: DocumentId,
    pub chunk_offset_start: u32,
}

/// Serializable registry state, minus the pointer table which is stored
/// separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub next_id: u32,
    pub documents: Vec<DocumentRecord>,
    pub tombstones: Vec<DocumentId>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentRegistry {
    /// Ordered by id, which is also registration order
    documents: BTreeMap<DocumentId, DocumentRecord>,
    /// Path of every live document
    paths: HashMap<PathBuf, DocumentId>,
    pointers: Vec<PointerEntry>,
    tombstones: BTreeSet<DocumentId>,
    next_id: u32,
    total_chunks: u32,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a document whose rows start at the current end of the
    /// vector matrix and maps `path` to it.
    pub fn register(
        &mut self,
        path: impl Into<PathBuf>,
        chunk_count: u32,
        content_hash: impl Into<String>,
    ) -> Result<DocumentId, RegistryError> {
        let id = DocumentId::new(self.next_id);
        let next_id = id.next().ok_or(RegistryError::IdsExhausted)?;

        let record = DocumentRecord {
            id,
            path: path.into(),
            chunk_offset_start: self.total_chunks,
            chunk_count,
            content_hash: content_hash.into(),
            indexed_at: get_utc_timestamp(),
        };
        self.append(record)?;
        self.next_id = next_id.value();

        Ok(id)
    }

    /// Places `record` at the end of the row space, keeping its id, path,
    /// hash and timestamp.
    pub(crate) fn append(&mut self, mut record: DocumentRecord) -> Result<(), RegistryError> {
        let total_chunks = self
            .total_chunks
            .checked_add(record.chunk_count)
            .ok_or(RegistryError::RowsExhausted)?;

        record.chunk_offset_start = self.total_chunks;
        if record.chunk_count > 0 {
            self.pointers.push(PointerEntry {
                document_id: record.id,
                chunk_offset_start: record.chunk_offset_start,
            });
        }
        self.total_chunks = total_chunks;
        self.paths.insert(record.path.clone(), record.id);
        self.documents.insert(record.id, record);

        Ok(())
    }

    /// Empty registry that continues the id sequence of `self`.
    pub(crate) fn empty_successor(&self) -> Self {
        Self {
            next_id: self.next_id,
            ..Self::default()
        }
    }

    /// Owner of `row`: the last pointer entry starting at or before it.
    ///
    /// Tombstoned owners are returned like live ones.
    pub fn resolve(&self, row: RowIndex) -> Result<DocumentId, RegistryError> {
        let not_found = || RegistryError::RowNotFound {
            row,
            total_chunks: self.total_chunks,
        };
        if row.value() >= self.total_chunks {
            return Err(not_found());
        }

        let idx = self
            .pointers
            .partition_point(|entry| entry.chunk_offset_start <= row.value());
        if idx == 0 {
            return Err(not_found());
        }
        Ok(self.pointers[idx - 1].document_id)
    }

    /// Marks a document deleted. Repeating the call is a no-op.
    pub fn tombstone(&mut self, id: DocumentId) -> Result<(), RegistryError> {
        let record = self
            .documents
            .get(&id)
            .ok_or(RegistryError::DocumentNotFound(id))?;

        if self.paths.get(&record.path) == Some(&id) {
            self.paths.remove(&record.path);
        }
        self.tombstones.insert(id);
        Ok(())
    }

    pub fn is_live(&self, id: DocumentId) -> bool {
        self.documents.contains_key(&id) && !self.tombstones.contains(&id)
    }

    /// Live document registered for `path`.
    pub fn lookup_path(&self, path: &Path) -> Option<DocumentId> {
        self.paths.get(path).copied()
    }

    pub fn document(&self, id: DocumentId) -> Option<&DocumentRecord> {
        self.documents.get(&id)
    }

    /// Live documents in registration order.
    pub fn live_documents(&self) -> impl Iterator<Item = &DocumentRecord> + '_ {
        self.documents
            .values()
            .filter(|record| !self.tombstones.contains(&record.id))
    }

    pub fn live_count(&self) -> usize {
        self.documents.len() - self.tombstones.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn tombstoned_ids(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.tombstones.iter().copied()
    }

    /// Rows owned by tombstoned documents.
    pub fn tombstoned_chunks(&self) -> u64 {
        self.tombstones
            .iter()
            .filter_map(|id| self.documents.get(id))
            .map(|record| u64::from(record.chunk_count))
            .sum()
    }

    /// Rows owned by all registered documents, tombstoned ones included.
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn pointers(&self) -> &[PointerEntry] {
        &self.pointers
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            next_id: self.next_id,
            documents: self.documents.values().cloned().collect(),
            tombstones: self.tombstones.iter().copied().collect(),
        }
    }

    /// Rebuilds a registry, checking that the pointer table agrees with the
    /// documents and that their rows tile `0..total_chunks` without gaps.
    pub fn from_snapshot(
        snapshot: RegistrySnapshot,
        pointers: Vec<PointerEntry>,
    ) -> Result<Self, RegistryError> {
        let corrupted = |msg: String| Err(RegistryError::Corrupted(msg));

        let mut registry = Self {
            next_id: snapshot.next_id,
            ..Self::default()
        };

        let mut expected_start = 0u32;
        for record in snapshot.documents {
            if record.id.value() >= snapshot.next_id {
                return corrupted(format!(
                    "document {} is not below next id {}",
                    record.id, snapshot.next_id
                ));
            }
            if registry.documents.contains_key(&record.id) {
                return corrupted(format!("document {} appears twice", record.id));
            }
            if record.chunk_offset_start != expected_start {
                return corrupted(format!(
                    "document {} starts at row {} but row {} was expected",
                    record.id, record.chunk_offset_start, expected_start
                ));
            }
            expected_start = match expected_start.checked_add(record.chunk_count) {
                Some(next) => next,
                None => return corrupted("row count overflows".to_string()),
            };
            registry.documents.insert(record.id, record);
        }
        registry.total_chunks = expected_start;

        let expected_pointers: Vec<PointerEntry> = registry
            .documents
            .values()
            .filter(|record| record.chunk_count > 0)
            .map(|record| PointerEntry {
                document_id: record.id,
                chunk_offset_start: record.chunk_offset_start,
            })
            .collect();
        if pointers != expected_pointers {
            return corrupted(format!(
                "pointer table has {} entries that do not match the {} documents with chunks",
                pointers.len(),
                expected_pointers.len()
            ));
        }
        registry.pointers = pointers;

        for id in snapshot.tombstones {
            if !registry.documents.contains_key(&id) {
                return corrupted(format!("tombstone for unknown document {id}"));
            }
            registry.tombstones.insert(id);
        }

        for record in registry.documents.values() {
            if registry.tombstones.contains(&record.id) {
                continue;
            }
            if let Some(other) = registry.paths.insert(record.path.clone(), record.id) {
                return corrupted(format!(
                    "documents {other} and {} are both live for {}",
                    record.id,
                    record.path.display()
                ));
            }
        }

        Ok(registry)
    }
}
