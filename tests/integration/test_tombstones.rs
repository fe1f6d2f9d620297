//! Deleted notes stay in the matrix but never come back from a search.

use std::path::Path;
use std::sync::Arc;

use vaultdex::{DocumentId, IndexError, MemorySource, RetrievalEngine};

use crate::common::{TableEmbedder, axis, table_settings};

const DIM: usize = 8;

/// Three notes of two chunks each, ids 0, 1, 2 over rows 0..6.
pub(crate) fn three_note_engine() -> (RetrievalEngine, Arc<MemorySource>) {
    let source = Arc::new(MemorySource::new());
    source.insert("d0.md", "aaaabbbb");
    source.insert("d1.md", "ccccdddd");
    source.insert("d2.md", "eeeeffff");

    let embedder = TableEmbedder::new(DIM)
        .with("aaaa", axis(DIM, 0))
        .with("bbbb", axis(DIM, 1))
        .with("cccc", axis(DIM, 2))
        .with("dddd", axis(DIM, 3))
        .with("eeee", axis(DIM, 4))
        .with("ffff", axis(DIM, 5))
        .with("everything", vec![1.0; DIM])
        .with("like c", axis(DIM, 2))
        .with("like e", axis(DIM, 4));

    let engine = RetrievalEngine::new(
        Arc::new(table_settings(DIM)),
        Arc::new(embedder),
        source.clone(),
    )
    .expect("engine");
    for (i, name) in ["d0.md", "d1.md", "d2.md"].iter().enumerate() {
        let id = engine.add_document(Path::new(name)).expect("index note");
        assert_eq!(id, DocumentId::new(i as u32));
    }
    (engine, source)
}

#[test]
fn test_tombstoned_note_is_excluded_from_search() {
    let (engine, _source) = three_note_engine();
    assert_eq!(engine.stats().total_rows, 6);

    engine.remove_document(Path::new("d1.md")).unwrap();

    let results = engine.similarity_search("everything", 6).unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.document_id != DocumentId::new(1)));
    assert!(results.iter().all(|r| r.path != Path::new("d1.md")));

    // A query pointing straight at the deleted chunk still finds nothing of it
    let results = engine.similarity_search("like c", 2).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.document_id != DocumentId::new(1)));
}

#[test]
fn test_tombstone_keeps_rows_until_compaction() {
    let (engine, _source) = three_note_engine();
    engine.remove_document(Path::new("d1.md")).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.tombstoned_documents, 1);
    assert_eq!(stats.total_rows, 6);
    assert_eq!(stats.live_rows, 4);
    assert!((stats.tombstone_ratio - 2.0 / 6.0).abs() < 1e-9);
    assert!(engine.needs_compaction());
}

#[test]
fn test_removing_twice_is_not_found() {
    let (engine, _source) = three_note_engine();
    engine.remove_document(Path::new("d1.md")).unwrap();

    assert!(matches!(
        engine.remove_document(Path::new("d1.md")),
        Err(IndexError::NotFound { .. })
    ));
    assert_eq!(engine.total_indexed_documents(), 2);
}

#[test]
fn test_search_on_fully_deleted_index_reports_no_documents() {
    let (engine, _source) = three_note_engine();
    for name in ["d0.md", "d1.md", "d2.md"] {
        engine.remove_document(Path::new(name)).unwrap();
    }

    assert!(matches!(
        engine.similarity_search("everything", 3),
        Err(IndexError::NoDocumentsIndexed)
    ));
}
