//! The retrieval engine: indexing notes and answering similarity queries.
//!
//! One [`parking_lot::RwLock`] guards the vector index and the document
//! registry together. Writers (inserts, removals, the compaction swap) take
//! it exclusively; searches take it shared. Reading sources, computing
//! embeddings and training the k-means partition always happen outside the
//! lock.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rayon::prelude::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::chunking::ChunkConfig;
use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::gc::{self, Compaction, GcReport};
use crate::indexing::{BulkReport, FileWalker, calculate_hash, get_utc_timestamp};
use crate::persistence::{
    INDEX_FORMAT_VERSION, IndexMetadata, PersistedState, PersistenceAdapter,
};
use crate::registry::DocumentRegistry;
use crate::source::SourceProvider;
use crate::types::{DocumentId, IndexingResult, RowIndex};
use crate::vector::{EmbeddingGateway, VectorIndex};

/// One passage returned by [`RetrievalEngine::similarity_search`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub path: PathBuf,
    /// Cosine similarity mapped onto `[0, 1]`
    pub similarity: f32,
    /// Chunk text as currently found in the source
    pub chunk_text: String,
    pub document_id: DocumentId,
    /// Chunk position within its document
    pub chunk_index: usize,
    /// Character offset of the chunk within its document
    pub char_offset: usize,
}

/// Point-in-time figures about the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub tombstoned_documents: usize,
    pub total_rows: usize,
    pub live_rows: usize,
    pub dimension: Option<usize>,
    pub clusters: usize,
    pub model_name: String,
    pub chunk_size: usize,
    pub overlap: usize,
    /// Share of rows owned by tombstoned documents
    pub tombstone_ratio: f64,
    pub needs_compaction: bool,
}

struct EngineState {
    index: VectorIndex,
    registry: DocumentRegistry,
    /// Bumped by every write, so a compaction built aside can tell whether
    /// it is still current
    generation: u64,
    /// Bumped whenever rows are renumbered, so a partition trained aside
    /// can tell whether it still describes the index
    row_epoch: u64,
    created_at: u64,
}

/// A document read, hashed, chunked and embedded, ready for insertion.
struct PreparedDocument {
    path: PathBuf,
    content_hash: String,
    vectors: Vec<Vec<f32>>,
}

/// Candidate chunk copied out from under the read lock.
struct Candidate {
    path: PathBuf,
    document_id: DocumentId,
    chunk_index: usize,
    similarity: f32,
}

pub struct RetrievalEngine {
    settings: Arc<Settings>,
    chunker: ChunkConfig,
    embedder: Arc<dyn EmbeddingGateway>,
    source: Arc<dyn SourceProvider>,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
    state: RwLock<EngineState>,
    /// Set while a partition is being trained
    training: AtomicBool,
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("RetrievalEngine")
            .field("model", &self.embedder.model_name())
            .field("documents", &state.registry.live_count())
            .field("rows", &state.index.len())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

impl RetrievalEngine {
    /// Creates an empty, purely in-memory engine.
    pub fn new(
        settings: Arc<Settings>,
        embedder: Arc<dyn EmbeddingGateway>,
        source: Arc<dyn SourceProvider>,
    ) -> IndexResult<Self> {
        settings.validate()?;
        let chunker = settings.chunk_config()?;
        let state = EngineState {
            index: VectorIndex::new(settings.partition_config()),
            registry: DocumentRegistry::new(),
            generation: 0,
            row_epoch: 0,
            created_at: get_utc_timestamp(),
        };

        Ok(Self {
            settings,
            chunker,
            embedder,
            source,
            persistence: None,
            state: RwLock::new(state),
            training: AtomicBool::new(false),
        })
    }

    /// Creates an engine backed by `persistence`, restoring the saved index
    /// if there is one.
    ///
    /// # Errors
    /// [`IndexError::InvalidConfiguration`] when the saved index was built
    /// with another chunking or model, [`IndexError::DimensionMismatch`]
    /// when its vectors do not fit the embedder, and
    /// [`IndexError::IndexCorrupted`] when the artifacts disagree.
    #[instrument(skip_all)]
    pub fn open(
        settings: Arc<Settings>,
        embedder: Arc<dyn EmbeddingGateway>,
        source: Arc<dyn SourceProvider>,
        persistence: Arc<dyn PersistenceAdapter>,
    ) -> IndexResult<Self> {
        let mut engine = Self::new(settings, embedder, source)?;

        if let Some(saved) = persistence.load()? {
            let state = engine.restore(saved)?;
            info!(
                documents = state.registry.live_count(),
                rows = state.index.len(),
                "opened index"
            );
            engine.state = RwLock::new(state);
        } else {
            debug!("no saved index, starting empty");
        }

        engine.persistence = Some(persistence);
        Ok(engine)
    }

    /// Creates an empty engine that saves through `persistence` without
    /// loading what was saved there. The saved index stays in place until
    /// the first [`RetrievalEngine::save`] replaces it.
    pub fn replacing(
        settings: Arc<Settings>,
        embedder: Arc<dyn EmbeddingGateway>,
        source: Arc<dyn SourceProvider>,
        persistence: Arc<dyn PersistenceAdapter>,
    ) -> IndexResult<Self> {
        let mut engine = Self::new(settings, embedder, source)?;
        engine.persistence = Some(persistence);
        Ok(engine)
    }

    fn restore(&self, saved: PersistedState) -> IndexResult<EngineState> {
        let metadata = &saved.metadata;
        if metadata.version != INDEX_FORMAT_VERSION {
            return Err(IndexError::IndexCorrupted {
                reason: format!(
                    "index format version {} is not supported (expected {INDEX_FORMAT_VERSION})",
                    metadata.version
                ),
            });
        }
        if metadata.chunk_size != self.chunker.chunk_size()
            || metadata.overlap != self.chunker.overlap()
        {
            return Err(IndexError::InvalidConfiguration {
                reason: format!(
                    "index was built with chunk_size={} overlap={}, settings say chunk_size={} overlap={}",
                    metadata.chunk_size,
                    metadata.overlap,
                    self.chunker.chunk_size(),
                    self.chunker.overlap()
                ),
            });
        }
        if metadata.model_name != self.embedder.model_name() {
            return Err(IndexError::InvalidConfiguration {
                reason: format!(
                    "index was built with model '{}', settings select '{}'",
                    metadata.model_name,
                    self.embedder.model_name()
                ),
            });
        }

        let registry = DocumentRegistry::from_snapshot(saved.registry, saved.pointers)?;
        let mut index = VectorIndex::from_bytes(&saved.vectors, self.settings.partition_config())?;

        let expected = self.embedder.dimension().get();
        if let Some(dimension) = index.dimension().map(|d| d.get()).or(metadata.dimension) {
            if dimension != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: dimension,
                });
            }
        }
        if index.len() != registry.total_chunks() as usize {
            return Err(IndexError::IndexCorrupted {
                reason: format!(
                    "registry covers {} rows but the vector matrix holds {}",
                    registry.total_chunks(),
                    index.len()
                ),
            });
        }
        for pointer in registry.pointers() {
            let row = RowIndex::new(pointer.chunk_offset_start);
            if index.label_of(row) != Some(pointer.document_id) {
                return Err(IndexError::IndexCorrupted {
                    reason: format!(
                        "row {row} should belong to document {}",
                        pointer.document_id
                    ),
                });
            }
        }

        // The matrix does not record removals
        let tombstoned: Vec<DocumentId> = registry.tombstoned_ids().collect();
        for id in tombstoned {
            index.remove_label(id);
        }

        Ok(EngineState {
            index,
            registry,
            generation: 0,
            row_epoch: 0,
            created_at: metadata.created_at,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        self.chunker
    }

    /// Indexes the document at `path` under a new id, tombstoning any
    /// document previously indexed for the same path.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn add_document(&self, path: &Path) -> IndexResult<DocumentId> {
        let key = self.source.document_key(path);
        let text = self.read_source(&key)?;
        let prepared = self.prepare(key, &text)?;
        self.insert_prepared(prepared)
    }

    /// Like [`RetrievalEngine::add_document`], but leaves the document alone
    /// when its content hash matches the live one.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn update_document(&self, path: &Path) -> IndexResult<IndexingResult> {
        let key = self.source.document_key(path);
        let text = self.read_source(&key)?;
        if let Some((id, live)) = self.live_document(&key) {
            if live == calculate_hash(&text) {
                debug!(document = %id, "content unchanged");
                return Ok(IndexingResult::Unchanged(id));
            }
        }
        let prepared = self.prepare(key, &text)?;
        self.insert_prepared(prepared).map(IndexingResult::Indexed)
    }

    /// Indexes `paths`, embedding in parallel and inserting one document at
    /// a time.
    ///
    /// Failures of single documents are recorded in the report. A
    /// dimension mismatch or a fatal error aborts the run. Cancelling stops
    /// between documents; documents inserted so far stay indexed.
    #[instrument(skip_all, fields(documents = paths.len()))]
    pub fn add_documents(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> IndexResult<BulkReport> {
        let mut report = BulkReport::new();
        let jobs = paths
            .iter()
            .map(|path| (self.source.document_key(path), None))
            .collect();
        self.index_jobs(jobs, cancel, &mut report)?;
        report.stop_timing();

        info!(
            indexed = report.indexed,
            failed = report.failed,
            chunks = report.chunks,
            cancelled = report.cancelled,
            "bulk indexing finished"
        );
        Ok(report)
    }

    /// Brings the index in line with the files under `root`.
    ///
    /// New files and files whose SHA-256 content hash changed are indexed,
    /// unchanged files are skipped and documents under `root` whose file
    /// no longer exists are removed.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn sync_directory(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> IndexResult<BulkReport> {
        let mut report = BulkReport::new();
        let files = FileWalker::new(Arc::clone(&self.settings)).walk(root)?;
        let root_key = self.source.document_key(root);

        let mut seen = HashSet::with_capacity(files.len());
        let mut jobs = Vec::new();
        for file in files {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.stop_timing();
                return Ok(report);
            }
            let key = self.source.document_key(&file);
            seen.insert(key.clone());

            let text = match self.read_source(&key) {
                Ok(text) => text,
                Err(e) => {
                    report.add_error(key, e.to_string());
                    continue;
                }
            };
            let hash = calculate_hash(&text);
            if self.live_document(&key).is_some_and(|(_, live)| live == hash) {
                report.unchanged += 1;
                continue;
            }
            jobs.push((key, Some(text)));
        }

        let vanished: Vec<PathBuf> = {
            let state = self.state.read();
            state
                .registry
                .live_documents()
                .filter(|record| record.path.starts_with(&root_key))
                .filter(|record| !seen.contains(&record.path))
                .map(|record| record.path.clone())
                .collect()
        };
        for path in vanished {
            match self.remove_document(&path) {
                Ok(()) => report.removed += 1,
                // Removed concurrently
                Err(IndexError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        self.index_jobs(jobs, cancel, &mut report)?;
        report.stop_timing();

        info!(
            indexed = report.indexed,
            unchanged = report.unchanged,
            removed = report.removed,
            failed = report.failed,
            "sync finished"
        );
        Ok(report)
    }

    /// Tombstones the live document registered for `path`.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn remove_document(&self, path: &Path) -> IndexResult<()> {
        let key = self.source.document_key(path);
        let mut state = self.state.write();
        let id = state
            .registry
            .lookup_path(&key)
            .ok_or_else(|| IndexError::NotFound {
                item: format!("Document for '{}'", key.display()),
            })?;

        state.registry.tombstone(id)?;
        state.index.remove_label(id);
        state.generation += 1;

        debug!(document = %id, "tombstoned document");
        Ok(())
    }

    /// Returns up to `top_k` chunks most similar to `query`, best first.
    ///
    /// # Errors
    /// [`IndexError::InvalidArgument`] for `top_k == 0` and
    /// [`IndexError::NoDocumentsIndexed`] when no live chunk exists.
    #[instrument(skip_all, fields(top_k = top_k, query_len = query.len()))]
    pub fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> IndexResult<Vec<SimilarityResult>> {
        if top_k == 0 {
            return Err(IndexError::InvalidArgument {
                reason: "top_k must be greater than 0".to_string(),
            });
        }
        if self.state.read().index.live_len() == 0 {
            return Err(IndexError::NoDocumentsIndexed);
        }

        let query_vector = self.embedder.embed(query)?;
        let factor = self.settings.search.overfetch_factor.max(1);
        let mut fetch = top_k.saturating_mul(factor);
        let mut texts: HashMap<PathBuf, Option<Arc<str>>> = HashMap::new();

        loop {
            let (candidates, exhausted) = self.collect_candidates(&query_vector, fetch)?;

            let mut results = Vec::with_capacity(top_k);
            for candidate in candidates {
                if results.len() == top_k {
                    break;
                }
                if let Some(result) = self.materialize(candidate, &mut texts) {
                    results.push(result);
                }
            }

            if results.len() >= top_k || exhausted {
                debug!(results = results.len(), fetched = fetch, "search finished");
                return Ok(results);
            }
            fetch = fetch.saturating_mul(2);
        }
    }

    /// Live documents currently indexed.
    pub fn total_indexed_documents(&self) -> usize {
        self.state.read().registry.live_count()
    }

    /// Physically removes tombstoned documents.
    ///
    /// Replacements are built under the shared lock and swapped in if no
    /// writer intervened. Otherwise the build is retried once, this time
    /// holding the exclusive lock. Cancelling leaves the index untouched.
    #[instrument(skip_all)]
    pub fn collect_garbage(&self, cancel: &CancellationToken) -> IndexResult<GcReport> {
        self.collect_garbage_then(cancel, || {})
    }

    /// [`RetrievalEngine::collect_garbage`] running `between` after the
    /// replacement was built and before it is swapped in.
    fn collect_garbage_then(
        &self,
        cancel: &CancellationToken,
        between: impl FnOnce(),
    ) -> IndexResult<GcReport> {
        let (generation, outcome) = {
            let state = self.state.read();
            (
                state.generation,
                gc::collect(&state.index, &state.registry, cancel)?,
            )
        };
        let Some(compaction) = outcome else {
            return Ok(GcReport::default());
        };
        between();

        let mut state = self.state.write();
        if state.generation == generation {
            return Ok(Self::swap_in(&mut state, compaction));
        }

        debug!("index changed during compaction, rebuilding under the write lock");
        match gc::collect(&state.index, &state.registry, cancel)? {
            Some(compaction) => Ok(Self::swap_in(&mut state, compaction)),
            None => Ok(GcReport::default()),
        }
    }

    fn swap_in(state: &mut EngineState, compaction: Compaction) -> GcReport {
        state.index = compaction.index;
        state.registry = compaction.registry;
        state.generation += 1;
        state.row_epoch += 1;

        let report = compaction.report;
        info!(
            documents_removed = report.documents_removed,
            rows_removed = report.rows_removed,
            rows_retained = report.rows_retained,
            "compacted index"
        );
        report
    }

    /// Whether tombstoned rows reached `gc.tombstone_ratio`.
    pub fn needs_compaction(&self) -> bool {
        let state = self.state.read();
        gc::needs_compaction(&state.registry, self.settings.gc.tombstone_ratio)
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        let total_rows = state.index.len();
        let tombstone_ratio = if total_rows == 0 {
            0.0
        } else {
            state.registry.tombstoned_chunks() as f64 / total_rows as f64
        };

        IndexStats {
            documents: state.registry.live_count(),
            tombstoned_documents: state.registry.tombstone_count(),
            total_rows,
            live_rows: state.index.live_len(),
            dimension: state.index.dimension().map(|d| d.get()),
            clusters: state.index.cluster_count(),
            model_name: self.embedder.model_name().to_string(),
            chunk_size: self.chunker.chunk_size(),
            overlap: self.chunker.overlap(),
            tombstone_ratio,
            needs_compaction: gc::needs_compaction(
                &state.registry,
                self.settings.gc.tombstone_ratio,
            ),
        }
    }

    /// Writes the index through the persistence adapter. A purely
    /// in-memory engine has nothing to save.
    #[instrument(skip_all)]
    pub fn save(&self) -> IndexResult<()> {
        let Some(persistence) = &self.persistence else {
            debug!("no persistence configured, skipping save");
            return Ok(());
        };

        let persisted = {
            let state = self.state.read();
            let mut metadata = IndexMetadata::new(
                self.embedder.model_name(),
                self.chunker.chunk_size(),
                self.chunker.overlap(),
            );
            metadata.created_at = state.created_at;
            metadata.dimension = state.index.dimension().map(|d| d.get());
            metadata.update_counts(state.registry.live_count(), state.registry.total_chunks());

            PersistedState {
                registry: state.registry.snapshot(),
                pointers: state.registry.pointers().to_vec(),
                vectors: state.index.to_bytes().into(),
                metadata,
            }
        };

        persistence.save(&persisted)?;
        info!(
            documents = persisted.metadata.document_count,
            rows = persisted.metadata.total_chunks,
            "saved index"
        );
        Ok(())
    }

    fn read_source(&self, path: &Path) -> IndexResult<String> {
        self.source
            .read(path)
            .map_err(|source| IndexError::FileRead {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Id and content hash of the live document registered for `key`.
    fn live_document(&self, key: &Path) -> Option<(DocumentId, String)> {
        let state = self.state.read();
        let id = state.registry.lookup_path(key)?;
        state
            .registry
            .document(id)
            .map(|record| (id, record.content_hash.clone()))
    }

    /// Hashes, chunks and embeds `text`. Runs without any lock.
    fn prepare(&self, path: PathBuf, text: &str) -> IndexResult<PreparedDocument> {
        let chunks: Vec<&str> = self.chunker.chunks(text).map(|chunk| chunk.text).collect();
        let vectors = if chunks.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&chunks)?
        };
        if vectors.len() != chunks.len() {
            return Err(IndexError::EmbeddingUnavailable {
                reason: format!(
                    "model returned {} embeddings for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            });
        }

        Ok(PreparedDocument {
            path,
            content_hash: calculate_hash(text),
            vectors,
        })
    }

    fn insert_prepared(&self, prepared: PreparedDocument) -> IndexResult<DocumentId> {
        let chunk_count =
            u32::try_from(prepared.vectors.len()).map_err(|_| IndexError::CapacityExhausted {
                reason: format!("{} has too many chunks", prepared.path.display()),
            })?;

        let (id, previous) = {
            let mut state = self.state.write();
            state.index.validate_batch(&prepared.vectors)?;

            let previous = state.registry.lookup_path(&prepared.path);
            let id = state
                .registry
                .register(&prepared.path, chunk_count, &prepared.content_hash)?;
            if let Some(previous) = previous {
                state.registry.tombstone(previous)?;
                state.index.remove_label(previous);
            }
            state.generation += 1;

            if let Err(e) = state.index.insert_many(&prepared.vectors, id) {
                return Err(IndexError::IndexCorrupted {
                    reason: format!(
                        "document {id} was registered but its vectors were rejected: {e}"
                    ),
                });
            }
            (id, previous)
        };
        self.refresh_partition();

        debug!(
            document = %id,
            path = %prepared.path.display(),
            chunks = chunk_count,
            replaced = ?previous,
            "indexed document"
        );
        Ok(id)
    }

    /// Retrains the k-means partition once the index outgrew it.
    ///
    /// The rows are copied out under the shared lock and clustered without
    /// any lock; the result is installed under the exclusive lock unless a
    /// compaction renumbered the rows meanwhile. Rows inserted during
    /// training are assigned on install. Only one training runs at a time.
    fn refresh_partition(&self) {
        if self
            .training
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let snapshot = {
            let state = self.state.read();
            state
                .index
                .needs_training()
                .then(|| (state.row_epoch, state.index.clone()))
        };
        if let Some((epoch, index)) = snapshot {
            let trained = index.train_partition();
            drop(index);

            let mut state = self.state.write();
            if state.row_epoch == epoch && state.index.install_partition(trained) {
                debug!(
                    rows = state.index.len(),
                    clusters = state.index.cluster_count(),
                    "installed retrained partition"
                );
            } else {
                debug!("rows were renumbered during training, dropping partition");
            }
        }

        self.training.store(false, Ordering::Release);
    }

    /// Prepares `jobs` on the rayon pool in batches and inserts the results
    /// in order.
    fn index_jobs(
        &self,
        jobs: Vec<(PathBuf, Option<String>)>,
        cancel: &CancellationToken,
        report: &mut BulkReport,
    ) -> IndexResult<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let threads = self.settings.indexing.parallel_threads;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| IndexError::InvalidConfiguration {
                reason: format!("failed to start {threads} indexing threads: {e}"),
            })?;
        let batch_size = threads.saturating_mul(4).max(1);

        let mut jobs = jobs.into_iter().peekable();
        while jobs.peek().is_some() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }
            let batch: Vec<(PathBuf, Option<String>)> = jobs.by_ref().take(batch_size).collect();

            let prepared: Vec<(PathBuf, IndexResult<PreparedDocument>)> = pool.install(|| {
                batch
                    .into_par_iter()
                    .map(|(path, text)| {
                        if cancel.is_cancelled() {
                            return (path, Err(IndexError::Cancelled));
                        }
                        let result = match text {
                            Some(text) => self.prepare(path.clone(), &text),
                            None => self
                                .read_source(&path)
                                .and_then(|text| self.prepare(path.clone(), &text)),
                        };
                        (path, result)
                    })
                    .collect()
            });

            for (path, result) in prepared {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(());
                }
                let outcome = result.and_then(|doc| {
                    let chunks = doc.vectors.len();
                    self.insert_prepared(doc).map(|_| chunks)
                });
                match outcome {
                    Ok(chunks) => {
                        report.indexed += 1;
                        report.chunks += chunks;
                    }
                    Err(IndexError::Cancelled) => {
                        report.cancelled = true;
                        return Ok(());
                    }
                    Err(e @ IndexError::DimensionMismatch { .. }) => return Err(e),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to index document");
                        report.add_error(path, e.to_string());
                    }
                }
            }
        }
        Ok(())
    }

    /// Shared-lock part of a search: nearest rows of live documents.
    /// The flag reports that the index has no further candidates.
    fn collect_candidates(
        &self,
        query: &[f32],
        fetch: usize,
    ) -> IndexResult<(Vec<Candidate>, bool)> {
        let state = self.state.read();
        let neighbors = state.index.search(query, fetch)?;
        let exhausted = neighbors.len() < fetch;

        let mut candidates = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let owner = state
                .registry
                .resolve(neighbor.row)
                .map_err(|e| IndexError::IndexCorrupted {
                    reason: e.to_string(),
                })?;
            if !state.registry.is_live(owner) {
                continue;
            }
            let Some(record) = state.registry.document(owner) else {
                continue;
            };
            candidates.push(Candidate {
                path: record.path.clone(),
                document_id: owner,
                chunk_index: (neighbor.row.value() - record.chunk_offset_start) as usize,
                similarity: neighbor.confidence.get(),
            });
        }
        Ok((candidates, exhausted))
    }

    /// Re-reads the candidate's source and re-slices its chunk. Returns
    /// `None` when the source vanished or no longer reaches the chunk.
    fn materialize(
        &self,
        candidate: Candidate,
        texts: &mut HashMap<PathBuf, Option<Arc<str>>>,
    ) -> Option<SimilarityResult> {
        let text = texts
            .entry(candidate.path.clone())
            .or_insert_with(|| match self.source.read(&candidate.path) {
                Ok(text) => Some(Arc::from(text)),
                Err(e) => {
                    warn!(
                        path = %candidate.path.display(),
                        error = %e,
                        "skipping results of unreadable document"
                    );
                    None
                }
            })
            .clone()?;

        let Some(chunk) = self.chunker.chunk_at(&text, candidate.chunk_index) else {
            warn!(
                path = %candidate.path.display(),
                chunk = candidate.chunk_index,
                "document shrank since indexing, skipping chunk"
            );
            return None;
        };

        Some(SimilarityResult {
            path: candidate.path,
            similarity: candidate.similarity,
            chunk_text: chunk.text.to_string(),
            document_id: candidate.document_id,
            chunk_index: chunk.index,
            char_offset: chunk.char_offset,
        })
    }
}
