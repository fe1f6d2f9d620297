//! Garbage collection of tombstoned documents.
//!
//! Collection never mutates the live structures. It builds a replacement
//! vector index and registry holding only live documents, and the caller
//! swaps them in under its exclusive lock. Cancelling drops the partial
//! replacements.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{IndexError, IndexResult};
use crate::registry::DocumentRegistry;
use crate::types::RowIndex;
use crate::vector::VectorIndex;

/// Summary of one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GcReport {
    pub documents_removed: usize,
    pub rows_removed: usize,
    pub rows_retained: usize,
    pub elapsed: Duration,
}

impl GcReport {
    pub fn is_noop(&self) -> bool {
        self.documents_removed == 0 && self.rows_removed == 0
    }
}

/// Replacement structures produced by [`collect`].
#[derive(Debug)]
pub struct Compaction {
    pub index: VectorIndex,
    pub registry: DocumentRegistry,
    pub report: GcReport,
}

/// Whether tombstoned rows make up at least `ratio` of all rows.
///
/// An index with tombstones but no rows at all (only empty documents were
/// removed) always qualifies.
pub fn needs_compaction(registry: &DocumentRegistry, ratio: f64) -> bool {
    if registry.tombstone_count() == 0 {
        return false;
    }
    let total = registry.total_chunks();
    if total == 0 {
        return true;
    }
    registry.tombstoned_chunks() as f64 / f64::from(total) >= ratio
}

/// Builds replacements for `index` and `registry` without tombstoned
/// documents. Returns `None` when there is nothing to collect.
///
/// Surviving documents keep their ids and relative order; their rows are
/// renumbered contiguously from zero.
pub fn collect(
    index: &VectorIndex,
    registry: &DocumentRegistry,
    cancel: &CancellationToken,
) -> IndexResult<Option<Compaction>> {
    if registry.tombstone_count() == 0 {
        return Ok(None);
    }
    let started = Instant::now();

    let (next_index, remap) = index.compacted(|id| registry.is_live(id), cancel)?;

    let mut next_registry = registry.empty_successor();
    for record in registry.live_documents() {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        let old_start = RowIndex::new(record.chunk_offset_start);
        next_registry.append(record.clone())?;

        if record.chunk_count > 0 {
            let expected = next_registry
                .document(record.id)
                .map(|moved| RowIndex::new(moved.chunk_offset_start));
            if remap.get(old_start) != expected {
                return Err(IndexError::IndexCorrupted {
                    reason: format!(
                        "rows of document {} do not line up after compaction",
                        record.id
                    ),
                });
            }
        }
    }

    if next_registry.total_chunks() as usize != next_index.len() {
        return Err(IndexError::IndexCorrupted {
            reason: format!(
                "registry covers {} rows but the compacted index holds {}",
                next_registry.total_chunks(),
                next_index.len()
            ),
        });
    }

    let report = GcReport {
        documents_removed: registry.tombstone_count(),
        rows_removed: remap.dropped(),
        rows_retained: remap.retained(),
        elapsed: started.elapsed(),
    };
    debug!(
        documents_removed = report.documents_removed,
        rows_removed = report.rows_removed,
        "built compacted index"
    );

    Ok(Some(Compaction {
        index: next_index,
        registry: next_registry,
        report,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PointerEntry;
    use crate::types::DocumentId;

    /// Three documents with two rows each, rows 0..6.
    fn three_documents() -> (VectorIndex, DocumentRegistry) {
        let mut index = VectorIndex::default();
        let mut registry = DocumentRegistry::new();
        for (i, name) in ["a.md", "b.md", "c.md"].iter().enumerate() {
            let id = registry.register(*name, 2, format!("hash-{i}")).unwrap();
            let base = i as f32;
            index.insert(&[1.0, base], id).unwrap();
            index.insert(&[base, 1.0], id).unwrap();
        }
        (index, registry)
    }

    fn tombstone(index: &mut VectorIndex, registry: &mut DocumentRegistry, id: u32) {
        registry.tombstone(DocumentId::new(id)).unwrap();
        index.remove_label(DocumentId::new(id));
    }

    #[test]
    fn test_collect_renumbers_survivors() {
        let (mut index, mut registry) = three_documents();
        tombstone(&mut index, &mut registry, 1);

        let compaction = collect(&index, &registry, &CancellationToken::new())
            .unwrap()
            .unwrap();

        assert_eq!(
            compaction.registry.pointers(),
            &[
                PointerEntry {
                    document_id: DocumentId::new(0),
                    chunk_offset_start: 0
                },
                PointerEntry {
                    document_id: DocumentId::new(2),
                    chunk_offset_start: 2
                },
            ]
        );
        // Document 2 moved from rows {4, 5} to {2, 3}
        for row in [2, 3] {
            assert_eq!(
                compaction.registry.resolve(RowIndex::new(row)).unwrap(),
                DocumentId::new(2)
            );
            assert_eq!(
                compaction.index.label_of(RowIndex::new(row)),
                Some(DocumentId::new(2))
            );
        }
        assert_eq!(compaction.index.row(RowIndex::new(2)), index.row(RowIndex::new(4)));

        assert_eq!(compaction.report.documents_removed, 1);
        assert_eq!(compaction.report.rows_removed, 2);
        assert_eq!(compaction.report.rows_retained, 4);
        assert_eq!(compaction.registry.tombstone_count(), 0);
        assert!(compaction.registry.document(DocumentId::new(1)).is_none());

        // The originals are untouched
        assert_eq!(index.len(), 6);
        assert_eq!(registry.tombstone_count(), 1);
    }

    #[test]
    fn test_ids_are_not_reused_after_collection() {
        let (mut index, mut registry) = three_documents();
        tombstone(&mut index, &mut registry, 2);

        let mut compaction = collect(&index, &registry, &CancellationToken::new())
            .unwrap()
            .unwrap();
        let id = compaction.registry.register("d.md", 1, "h").unwrap();
        assert_eq!(id, DocumentId::new(3));
    }

    #[test]
    fn test_second_collection_is_noop() {
        let (mut index, mut registry) = three_documents();
        tombstone(&mut index, &mut registry, 0);

        let compaction = collect(&index, &registry, &CancellationToken::new())
            .unwrap()
            .unwrap();
        let again = collect(
            &compaction.index,
            &compaction.registry,
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_cancelled_collection_leaves_nothing() {
        let (mut index, mut registry) = three_documents();
        tombstone(&mut index, &mut registry, 1);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            collect(&index, &registry, &cancel),
            Err(IndexError::Cancelled)
        ));
        assert_eq!(index.len(), 6);
    }

    #[test]
    fn test_needs_compaction() {
        let (mut index, mut registry) = three_documents();
        assert!(!needs_compaction(&registry, 0.3));

        tombstone(&mut index, &mut registry, 0);
        // 2 of 6 rows
        assert!(needs_compaction(&registry, 0.3));
        assert!(!needs_compaction(&registry, 0.5));

        let mut empty = DocumentRegistry::new();
        let id = empty.register("empty.md", 0, "h").unwrap();
        empty.tombstone(id).unwrap();
        assert!(needs_compaction(&empty, 0.9));
    }
}
