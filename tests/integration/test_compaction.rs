//! Garbage collection through the engine and directly on the structures.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tokio_util::sync::CancellationToken;
use vaultdex::gc;
use vaultdex::vector::PartitionConfig;
use vaultdex::{
    DocumentId, DocumentRegistry, IndexError, MemoryPersistence, MemorySource, PointerEntry,
    RetrievalEngine, RowIndex, VectorIndex,
};

use crate::common::{TableEmbedder, axis, table_settings};
use crate::test_tombstones::three_note_engine;

#[test]
fn test_compaction_renumbers_surviving_rows() {
    let mut registry = DocumentRegistry::new();
    let mut index = VectorIndex::new(PartitionConfig::default());
    for doc in 0..3u32 {
        let id = registry.register(format!("d{doc}.md"), 2, "hash").unwrap();
        let rows = vec![axis(6, 2 * doc as usize), axis(6, 2 * doc as usize + 1)];
        index.insert_many(&rows, id).unwrap();
    }

    let deleted = DocumentId::new(1);
    registry.tombstone(deleted).unwrap();
    index.remove_label(deleted);

    let compaction = gc::collect(&index, &registry, &CancellationToken::new())
        .unwrap()
        .expect("tombstones to collect");

    assert_eq!(
        compaction.registry.pointers(),
        &[
            PointerEntry {
                document_id: DocumentId::new(0),
                chunk_offset_start: 0,
            },
            PointerEntry {
                document_id: DocumentId::new(2),
                chunk_offset_start: 2,
            },
        ]
    );

    // Rows 4 and 5 of note 2 moved to 2 and 3 with their vectors
    let next = &compaction.index;
    assert_eq!(next.len(), 4);
    assert_eq!(next.label_of(RowIndex::new(2)), Some(DocumentId::new(2)));
    assert_eq!(next.label_of(RowIndex::new(3)), Some(DocumentId::new(2)));
    assert_eq!(next.row(RowIndex::new(2)), Some(axis(6, 4).as_slice()));
    assert_eq!(next.row(RowIndex::new(3)), Some(axis(6, 5).as_slice()));
    assert_eq!(
        compaction.registry.resolve(RowIndex::new(3)).unwrap(),
        DocumentId::new(2)
    );

    assert_eq!(compaction.report.documents_removed, 1);
    assert_eq!(compaction.report.rows_removed, 2);
    assert_eq!(compaction.report.rows_retained, 4);
    assert_eq!(compaction.registry.tombstone_count(), 0);

    // Originals are untouched
    assert_eq!(index.len(), 6);
    assert_eq!(registry.tombstone_count(), 1);
}

#[test]
fn test_engine_compaction_keeps_search_results() {
    let (engine, _source) = three_note_engine();
    engine.remove_document(Path::new("d1.md")).unwrap();
    let before = engine.similarity_search("everything", 6).unwrap();

    let report = engine.collect_garbage(&CancellationToken::new()).unwrap();
    assert_eq!(report.documents_removed, 1);
    assert_eq!(report.rows_removed, 2);
    assert_eq!(report.rows_retained, 4);

    let stats = engine.stats();
    assert_eq!(stats.total_rows, 4);
    assert_eq!(stats.live_rows, 4);
    assert_eq!(stats.tombstoned_documents, 0);
    assert!(!engine.needs_compaction());

    let after = engine.similarity_search("everything", 6).unwrap();
    assert_eq!(before, after);

    let top = &engine.similarity_search("like e", 1).unwrap()[0];
    assert_eq!(top.path, Path::new("d2.md"));
    assert_eq!(top.document_id, DocumentId::new(2));
    assert_eq!(top.chunk_index, 0);
    assert_eq!(top.char_offset, 0);
    assert_eq!(top.chunk_text, "eeee");
}

#[test]
fn test_ids_are_not_reused_after_compaction() {
    let (engine, source) = three_note_engine();
    engine.remove_document(Path::new("d2.md")).unwrap();
    engine.collect_garbage(&CancellationToken::new()).unwrap();

    source.insert("d3.md", "aaaa");
    let id = engine.add_document(Path::new("d3.md")).unwrap();
    assert_eq!(id, DocumentId::new(3));
}

#[test]
fn test_second_collection_is_a_noop() {
    let (engine, _source) = three_note_engine();
    engine.remove_document(Path::new("d0.md")).unwrap();
    let cancel = CancellationToken::new();

    assert!(!engine.collect_garbage(&cancel).unwrap().is_noop());
    let again = engine.collect_garbage(&cancel).unwrap();
    assert!(again.is_noop());
    assert_eq!(engine.stats().total_rows, 4);
}

#[test]
fn test_cancelled_collection_leaves_index_untouched() {
    let (engine, _source) = three_note_engine();
    engine.remove_document(Path::new("d1.md")).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        engine.collect_garbage(&cancel),
        Err(IndexError::Cancelled)
    ));

    let stats = engine.stats();
    assert_eq!(stats.total_rows, 6);
    assert_eq!(stats.tombstoned_documents, 1);
}

#[test]
fn test_collection_races_with_writers() {
    const DIM: usize = 6;
    let contents = [
        "aaaabbbb", "ccccdddd", "eeeeffff", "aaaadddd", "ccccffff", "eeeebbbb",
    ];
    let mut embedder = TableEmbedder::new(DIM).with("everything", vec![1.0; DIM]);
    for (i, chunk) in ["aaaa", "bbbb", "cccc", "dddd", "eeee", "ffff"].iter().enumerate() {
        embedder = embedder.with(chunk, axis(DIM, i));
    }
    let embedder = Arc::new(embedder);
    let settings = Arc::new(table_settings(DIM));
    let source = Arc::new(MemorySource::new());
    let persistence = Arc::new(MemoryPersistence::new());
    let engine = RetrievalEngine::open(
        settings.clone(),
        embedder.clone(),
        source.clone(),
        persistence.clone(),
    )
    .unwrap();

    let done = AtomicBool::new(false);
    let live: HashMap<PathBuf, &str> = thread::scope(|scope| {
        let collector = scope.spawn(|| {
            let cancel = CancellationToken::new();
            while !done.load(Ordering::Acquire) {
                engine.collect_garbage(&cancel).unwrap();
            }
        });
        let reader = scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                match engine.similarity_search("everything", 8) {
                    Ok(results) => assert!(results.len() <= 8),
                    Err(IndexError::NoDocumentsIndexed) => {}
                    Err(e) => panic!("search failed during collection: {e}"),
                }
            }
        });

        let mut live = HashMap::new();
        for round in 0..400usize {
            let path = PathBuf::from(format!("n{}.md", round % 12));
            if round % 5 == 4 {
                match engine.remove_document(&path) {
                    Ok(()) => assert!(live.remove(&path).is_some()),
                    Err(IndexError::NotFound { .. }) => assert!(!live.contains_key(&path)),
                    Err(e) => panic!("remove failed: {e}"),
                }
            } else {
                let text = contents[round % contents.len()];
                source.insert(path.clone(), text);
                engine.add_document(&path).unwrap();
                live.insert(path, text);
            }
        }
        done.store(true, Ordering::Release);

        collector.join().unwrap();
        reader.join().unwrap();
        live
    });

    assert_eq!(engine.total_indexed_documents(), live.len());
    let results = engine.similarity_search("everything", 1000).unwrap();
    assert_eq!(results.len(), 2 * live.len());
    let returned: HashSet<&Path> = results.iter().map(|r| r.path.as_path()).collect();
    let expected: HashSet<&Path> = live.keys().map(PathBuf::as_path).collect();
    assert_eq!(returned, expected);
    for result in &results {
        let text = live[&result.path];
        let start = result.char_offset;
        assert_eq!(result.chunk_text, &text[start..start + 4]);
    }

    // Restoring checks that every registry row lines up with the matrix
    engine.save().unwrap();
    let reopened =
        RetrievalEngine::open(settings, embedder, source.clone(), persistence).unwrap();
    assert_eq!(reopened.stats(), engine.stats());

    engine.collect_garbage(&CancellationToken::new()).unwrap();
    let stats = engine.stats();
    assert_eq!(stats.total_rows, 2 * live.len());
    assert_eq!(stats.live_rows, stats.total_rows);
    assert_eq!(stats.tombstoned_documents, 0);
}
