//! Keeping the index in line with a notes directory.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vaultdex::{FsSource, RetrievalEngine};

use crate::common::{TestVault, hashing_engine};

fn vault() -> TestVault {
    let vault = TestVault::new();
    vault.add_file("inbox.md", "Call the plumber about the dripping kitchen tap.");
    vault.add_file("garden.md", "Sow the broad beans in November under a cloche.");
    vault.add_file("projects/shed.md", "The shed roof needs new felt before winter.");
    vault.add_file("scratch.txt", "not a note, skipped by extension");
    vault.add_file(".obsidian/workspace.md", "hidden folders are skipped");
    vault
}

fn engine_for(vault: &TestVault) -> RetrievalEngine {
    hashing_engine(Arc::new(FsSource::new(vault.path())))
}

#[test]
fn test_first_sync_indexes_every_note() {
    let vault = vault();
    let engine = engine_for(&vault);

    let report = engine
        .sync_directory(vault.path(), &CancellationToken::new())
        .unwrap();

    assert_eq!(report.indexed, 3);
    assert_eq!(report.unchanged, 0);
    assert_eq!(report.removed, 0);
    assert_eq!(report.failed, 0);
    assert!(report.chunks >= 3);
    assert!(!report.cancelled);
    assert_eq!(engine.total_indexed_documents(), 3);

    // Keys are relative to the vault
    let results = engine.similarity_search("shed roof felt", 1).unwrap();
    assert_eq!(results[0].path, Path::new("projects/shed.md"));
}

#[test]
fn test_resync_only_touches_changes() {
    let vault = vault();
    let engine = engine_for(&vault);
    let cancel = CancellationToken::new();
    engine.sync_directory(vault.path(), &cancel).unwrap();

    let report = engine.sync_directory(vault.path(), &cancel).unwrap();
    assert_eq!(report.indexed, 0);
    assert_eq!(report.unchanged, 3);
    assert_eq!(engine.stats().tombstoned_documents, 0);

    vault.add_file("inbox.md", "Plumber booked for Thursday morning.");
    vault.remove_file("garden.md");
    vault.add_file("reading.md", "Finish the chapter on soil biology.");

    let report = engine.sync_directory(vault.path(), &cancel).unwrap();
    assert_eq!(report.indexed, 2);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(engine.total_indexed_documents(), 3);

    let stats = engine.stats();
    // Old inbox and the deleted garden note
    assert_eq!(stats.tombstoned_documents, 2);

    let results = engine.similarity_search("broad beans cloche", 20).unwrap();
    assert!(results.iter().all(|r| r.path != Path::new("garden.md")));
    let results = engine.similarity_search("plumber thursday", 1).unwrap();
    assert_eq!(results[0].path, Path::new("inbox.md"));
    assert!(results[0].chunk_text.contains("Thursday"));
}

#[test]
fn test_sync_of_subdirectory_leaves_other_notes_alone() {
    let vault = vault();
    let engine = engine_for(&vault);
    let cancel = CancellationToken::new();
    engine.sync_directory(vault.path(), &cancel).unwrap();

    vault.remove_file("inbox.md");
    let report = engine
        .sync_directory(&vault.path().join("projects"), &cancel)
        .unwrap();

    assert_eq!(report.unchanged, 1);
    assert_eq!(report.removed, 0);
    assert_eq!(engine.total_indexed_documents(), 3);
}

#[test]
fn test_cancelled_sync_indexes_nothing() {
    let vault = vault();
    let engine = engine_for(&vault);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine.sync_directory(vault.path(), &cancel).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.indexed, 0);
    assert_eq!(engine.total_indexed_documents(), 0);
}

#[test]
fn test_bulk_add_records_unreadable_files() {
    let vault = vault();
    let engine = engine_for(&vault);

    let paths = vec![
        vault.path().join("inbox.md"),
        vault.path().join("missing.md"),
        vault.path().join("garden.md"),
    ];
    let report = engine
        .add_documents(&paths, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.indexed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, Path::new("missing.md"));
    assert_eq!(engine.total_indexed_documents(), 2);
}
