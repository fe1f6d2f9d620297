//! Chunk windows and ranking as seen through the engine.

use std::path::Path;
use std::sync::Arc;

use vaultdex::{ChunkConfig, IndexError, MemorySource, RetrievalEngine};

use crate::common::{hashing_embedder, hashing_engine, hashing_settings};
use crate::test_tombstones::three_note_engine;

#[test]
fn test_250_character_note_yields_four_windows() {
    let text: String = ('a'..='y').cycle().take(250).collect();
    let config = ChunkConfig::new(100, 20).unwrap();

    let chunks: Vec<_> = config.chunks(&text).collect();
    let offsets: Vec<usize> = chunks.iter().map(|c| c.char_offset).collect();
    assert_eq!(offsets, vec![0, 80, 160, 240]);
    assert_eq!(chunks[3].text.chars().count(), 10);
    assert_eq!(config.chunk_count(250), 4);

    let mut settings = hashing_settings();
    settings.chunking.chunk_size = 100;
    settings.chunking.overlap = 20;
    let source = Arc::new(MemorySource::new());
    source.insert("long.md", text.clone());
    let engine = RetrievalEngine::new(Arc::new(settings), hashing_embedder(), source).unwrap();
    engine.add_document(Path::new("long.md")).unwrap();

    assert_eq!(engine.stats().total_rows, 4);
    let results = engine.similarity_search(&text[240..], 4).unwrap();
    assert_eq!(results.len(), 4);
    let last = results.iter().find(|r| r.chunk_index == 3).unwrap();
    assert_eq!(last.char_offset, 240);
    assert_eq!(last.chunk_text, &text[240..]);
}

#[test]
fn test_empty_index_reports_no_documents() {
    let engine = hashing_engine(Arc::new(MemorySource::new()));
    assert_eq!(engine.total_indexed_documents(), 0);

    let err = engine.similarity_search("compost", 5).unwrap_err();
    assert!(matches!(err, IndexError::NoDocumentsIndexed));
}

#[test]
fn test_empty_note_indexes_without_rows() {
    let source = Arc::new(MemorySource::new());
    source.insert("blank.md", "");
    let engine = hashing_engine(source);

    engine.add_document(Path::new("blank.md")).unwrap();
    assert_eq!(engine.total_indexed_documents(), 1);
    assert_eq!(engine.stats().total_rows, 0);
    assert!(matches!(
        engine.similarity_search("anything", 1),
        Err(IndexError::NoDocumentsIndexed)
    ));
}

#[test]
fn test_results_are_ranked_and_bounded() {
    let source = Arc::new(MemorySource::new());
    let notes = [
        ("garden.md", "Tomatoes want full sun, deep watering and a stake to climb."),
        ("kitchen.md", "Slow roasted tomatoes with garlic keep for a week in oil."),
        ("bikes.md", "Check the chain tension before every long ride in the rain."),
        ("books.md", "A reading list of novels about sailing across the Atlantic."),
        ("compost.md", "Turn the compost heap weekly; keep it damp, never soaked."),
    ];
    for (name, text) in notes {
        source.insert(name, text);
    }
    let engine = hashing_engine(source);
    for (name, _) in notes {
        engine.add_document(Path::new(name)).unwrap();
    }

    for k in [1, 3, 7, 50] {
        let results = engine.similarity_search("tomatoes in the garden", k).unwrap();
        assert!(results.len() <= k);
        assert!(!results.is_empty());
        assert!(
            results
                .windows(2)
                .all(|pair| pair[0].similarity >= pair[1].similarity)
        );
        assert!(
            results
                .iter()
                .all(|r| (0.0..=1.0).contains(&r.similarity))
        );
    }

    let all = engine.similarity_search("tomatoes in the garden", 1000).unwrap();
    assert_eq!(all.len(), engine.stats().live_rows);

    let top = &engine.similarity_search("tomatoes full sun", 1).unwrap()[0];
    assert_eq!(top.path, Path::new("garden.md"));
}

#[test]
fn test_zero_top_k_is_rejected() {
    let source = Arc::new(MemorySource::new());
    source.insert("a.md", "something to find");
    let engine = hashing_engine(source);
    engine.add_document(Path::new("a.md")).unwrap();

    assert!(matches!(
        engine.similarity_search("find", 0),
        Err(IndexError::InvalidArgument { .. })
    ));
}

#[test]
fn test_edited_note_drops_stale_chunks_from_results() {
    let source = Arc::new(MemorySource::new());
    source.insert("log.md", "a long entry about pruning the apple trees in early spring");
    let engine = hashing_engine(source.clone());
    engine.add_document(Path::new("log.md")).unwrap();
    let rows = engine.stats().live_rows;
    assert!(rows > 1);

    // Shrunk behind the index's back: only chunk 0 can still be re-read
    source.insert("log.md", "pruning");
    let results = engine.similarity_search("pruning apple trees", rows).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_index, 0);
    assert_eq!(results[0].chunk_text, "pruning");
}

#[test]
fn test_query_embedding_failure_is_reported() {
    let (engine, _source) = three_note_engine();

    let err = engine
        .similarity_search("a query the model cannot embed", 3)
        .unwrap_err();
    assert!(matches!(err, IndexError::EmbeddingUnavailable { .. }));
    assert_eq!(err.status_code(), "EMBEDDING_UNAVAILABLE");
    assert!(err.is_retryable());

    // The index is still usable afterwards
    assert_eq!(engine.similarity_search("like e", 1).unwrap().len(), 1);
}

#[test]
fn test_chunk_embedding_failure_indexes_nothing() {
    let (engine, source) = three_note_engine();
    source.insert("d3.md", "zzzzyyyy");

    assert!(matches!(
        engine.add_document(Path::new("d3.md")),
        Err(IndexError::EmbeddingUnavailable { .. })
    ));
    assert_eq!(engine.total_indexed_documents(), 3);
    assert_eq!(engine.stats().total_rows, 6);

    // A failed re-index keeps the previous version live
    source.insert("d0.md", "aaaazzzz");
    assert!(matches!(
        engine.add_document(Path::new("d0.md")),
        Err(IndexError::EmbeddingUnavailable { .. })
    ));
    let stats = engine.stats();
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.tombstoned_documents, 0);
    let results = engine.similarity_search("everything", 6).unwrap();
    assert_eq!(results.len(), 6);
    assert!(results.iter().any(|r| r.path == Path::new("d0.md")));
}
