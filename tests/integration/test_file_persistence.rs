//! Saving to and reopening from an index directory on disk.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vaultdex::{FilePersistence, FsSource, IndexError, PersistenceAdapter, RetrievalEngine};

use crate::common::{TestVault, hashing_embedder, hashing_settings};

fn open(vault: &TestVault) -> Result<RetrievalEngine, IndexError> {
    open_with(vault, hashing_settings())
}

fn open_with(vault: &TestVault, settings: vaultdex::Settings) -> Result<RetrievalEngine, IndexError> {
    RetrievalEngine::open(
        Arc::new(settings),
        hashing_embedder(),
        Arc::new(FsSource::new(vault.path())),
        Arc::new(FilePersistence::new(vault.index_path())),
    )
}

fn populated_vault() -> TestVault {
    let vault = TestVault::new();
    vault.add_file(
        "garden.md",
        "Tomatoes want full sun, deep watering and a stake to climb.",
    );
    vault.add_file(
        "recipes/soup.md",
        "Roast the tomatoes with garlic, then blend with stock and basil.",
    );
    vault.add_file(
        "trips.md",
        "Pack a rain jacket for the ferry crossing to the islands.",
    );
    vault
}

#[test]
fn test_saved_index_reopens_with_same_results() {
    let vault = populated_vault();
    let engine = open(&vault).unwrap();
    engine
        .sync_directory(vault.path(), &CancellationToken::new())
        .unwrap();
    engine.remove_document(Path::new("trips.md")).unwrap();
    engine.save().unwrap();

    let persistence = FilePersistence::new(vault.index_path());
    assert!(persistence.exists());
    let metadata = persistence.load_metadata().unwrap().unwrap();
    assert_eq!(metadata.document_count, 2);
    assert_eq!(metadata.model_name, "hashing");

    let before = engine.similarity_search("roast tomatoes", 3).unwrap();
    drop(engine);

    let reopened = open(&vault).unwrap();
    assert_eq!(reopened.total_indexed_documents(), 2);
    assert_eq!(reopened.stats().tombstoned_documents, 1);
    let after = reopened.similarity_search("roast tomatoes", 3).unwrap();
    assert_eq!(before, after);
    assert!(after.iter().all(|r| r.path != Path::new("trips.md")));
}

#[test]
fn test_compacted_index_survives_reopen() {
    let vault = populated_vault();
    let engine = open(&vault).unwrap();
    engine
        .sync_directory(vault.path(), &CancellationToken::new())
        .unwrap();
    engine.remove_document(Path::new("garden.md")).unwrap();
    engine.collect_garbage(&CancellationToken::new()).unwrap();
    engine.save().unwrap();
    let rows = engine.stats().total_rows;
    drop(engine);

    let reopened = open(&vault).unwrap();
    let stats = reopened.stats();
    assert_eq!(stats.total_rows, rows);
    assert_eq!(stats.live_rows, rows);
    assert_eq!(stats.tombstoned_documents, 0);
    let results = reopened.similarity_search("tomatoes", 10).unwrap();
    assert!(results.iter().all(|r| r.path != Path::new("garden.md")));
}

#[test]
fn test_open_without_saved_index_starts_empty() {
    let vault = TestVault::new();
    let engine = open(&vault).unwrap();
    assert_eq!(engine.total_indexed_documents(), 0);
    assert!(!FilePersistence::new(vault.index_path()).exists());
}

#[test]
fn test_open_rejects_different_chunking() {
    let vault = populated_vault();
    let engine = open(&vault).unwrap();
    engine.add_document(Path::new("garden.md")).unwrap();
    engine.save().unwrap();
    drop(engine);

    let mut settings = hashing_settings();
    settings.chunking.chunk_size = 64;
    assert!(matches!(
        open_with(&vault, settings),
        Err(IndexError::InvalidConfiguration { .. })
    ));
}

#[test]
fn test_missing_artifact_fails_to_open() {
    let vault = populated_vault();
    let engine = open(&vault).unwrap();
    engine.add_document(Path::new("garden.md")).unwrap();
    engine.save().unwrap();
    drop(engine);

    let generation = FilePersistence::new(vault.index_path())
        .current_dir()
        .unwrap()
        .unwrap();
    fs::remove_file(generation.join("pointers.json")).unwrap();
    let err = open(&vault).unwrap_err();
    assert!(matches!(err, IndexError::Persistence(_)));

    assert!(FilePersistence::new(vault.index_path()).load().is_err());
}

#[test]
fn test_failed_save_leaves_previous_index_loadable() {
    let vault = populated_vault();
    let engine = open(&vault).unwrap();
    engine.add_document(Path::new("garden.md")).unwrap();
    engine.save().unwrap();

    engine.add_document(Path::new("trips.md")).unwrap();
    // Blocks the pointer switch of the next save
    let blocker = vault.index_path().join("CURRENT.tmp");
    fs::create_dir(&blocker).unwrap();
    let err = engine.save().unwrap_err();
    assert!(matches!(err, IndexError::Persistence(_)));
    assert!(!err.is_fatal());
    drop(engine);

    let reopened = open(&vault).unwrap();
    assert_eq!(reopened.total_indexed_documents(), 1);
    let results = reopened.similarity_search("tomatoes sun", 3).unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.path == Path::new("garden.md")));

    fs::remove_dir(&blocker).unwrap();
    reopened.add_document(Path::new("trips.md")).unwrap();
    reopened.save().unwrap();
    drop(reopened);
    assert_eq!(open(&vault).unwrap().total_indexed_documents(), 2);
}

#[test]
fn test_rebuild_replaces_index_built_with_other_settings() {
    let vault = populated_vault();
    let engine = open(&vault).unwrap();
    engine
        .sync_directory(vault.path(), &CancellationToken::new())
        .unwrap();
    engine.save().unwrap();
    drop(engine);

    let mut wider = hashing_settings();
    wider.chunking.chunk_size = 64;
    wider.chunking.overlap = 16;
    let err = open_with(&vault, wider.clone()).unwrap_err();
    assert!(
        err.recovery_suggestions()
            .iter()
            .any(|hint| hint.contains("--rebuild"))
    );

    let rebuilt = RetrievalEngine::replacing(
        Arc::new(wider.clone()),
        hashing_embedder(),
        Arc::new(FsSource::new(vault.path())),
        Arc::new(FilePersistence::new(vault.index_path())),
    )
    .unwrap();
    assert_eq!(rebuilt.total_indexed_documents(), 0);
    // Nothing is replaced before the first save
    assert!(open(&vault).is_ok());

    rebuilt
        .sync_directory(vault.path(), &CancellationToken::new())
        .unwrap();
    rebuilt.save().unwrap();
    drop(rebuilt);

    let reopened = open_with(&vault, wider).unwrap();
    assert_eq!(reopened.total_indexed_documents(), 3);
    assert_eq!(reopened.stats().chunk_size, 64);
    assert!(matches!(
        open(&vault),
        Err(IndexError::InvalidConfiguration { .. })
    ));
}
