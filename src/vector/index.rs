//! Append-only matrix of chunk vectors with top-K cosine search.
//!
//! Every row carries the id of the document that owns it (its label). Rows
//! are never reordered or removed in place: removing a label only hides its
//! rows from search, and [`VectorIndex::compacted`] builds a fresh index
//! without them.
//!
//! Small indexes are searched exhaustively. Once the row count reaches
//! [`PartitionConfig::min_rows`] the rows can be partitioned with k-means
//! into an inverted file: a query scores cluster centroids first and then
//! only the rows of the closest clusters.
//!
//! Inserting never trains. A new row joins the cluster of its nearest
//! centroid, and [`VectorIndex::needs_training`] reports when the row count
//! has outgrown the centroids. Training itself only borrows the index
//! ([`VectorIndex::train_partition`]), so it can run next to searches, and
//! [`VectorIndex::install_partition`] adopts the result, assigning rows that
//! were appended in the meantime. Probing continues past
//! [`PartitionConfig::probe_clusters`] until at least `top_k` live
//! candidates were scored, so a search never returns fewer rows than are
//! available just because the nearest clusters were small.

use std::collections::{HashMap, HashSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::{DocumentId, RowIndex};
use crate::vector::clustering::{
    ClusteringError, assign_to_nearest_centroid, cosine_similarity, dot, kmeans_clustering,
    l2_norm,
};
use crate::vector::storage::{decode_rows, encode_matrix, read_header};
use crate::vector::types::{Neighbor, RowRemap, Score, VectorDimension, VectorError};

const MIN_CLUSTERS: usize = 1;

const MAX_CLUSTERS: usize = 100;

/// When to partition the index and how widely to probe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionConfig {
    /// Row count from which the k-means partition is trained
    pub min_rows: usize,
    /// Minimum number of clusters scored per query
    pub probe_clusters: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            min_rows: 4096,
            probe_clusters: 2,
        }
    }
}

/// Inverted-file partition: unit centroids and the rows assigned to each.
#[derive(Debug, Clone)]
struct Partition {
    centroids: Vec<Vec<f32>>,
    members: Vec<Vec<u32>>,
}

/// Outcome of [`VectorIndex::train_partition`], trained over the rows the
/// index held at the time.
#[derive(Debug, Clone)]
pub struct TrainedPartition {
    partition: Option<Partition>,
    rows: usize,
    dimension: Option<VectorDimension>,
}

impl TrainedPartition {
    /// Rows the centroids were trained over.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of clusters, 0 when training failed.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.partition.as_ref().map_or(0, |p| p.centroids.len())
    }
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    /// Fixed by the first inserted vector
    dimension: Option<VectorDimension>,
    /// Row-major vector values
    values: Vec<f32>,
    norms: Vec<f32>,
    labels: Vec<DocumentId>,
    rows_per_label: HashMap<DocumentId, usize>,
    removed: HashSet<DocumentId>,
    removed_rows: usize,
    partition: Option<Partition>,
    /// Row count of the last installed training, 0 if never trained
    trained_rows: usize,
    config: PartitionConfig,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new(PartitionConfig::default())
    }
}

impl VectorIndex {
    #[must_use]
    pub fn new(config: PartitionConfig) -> Self {
        Self {
            dimension: None,
            values: Vec::new(),
            norms: Vec::new(),
            labels: Vec::new(),
            rows_per_label: HashMap::new(),
            removed: HashSet::new(),
            removed_rows: 0,
            partition: None,
            trained_rows: 0,
            config,
        }
    }

    /// Dimension of the stored vectors, `None` until the first insert.
    #[must_use]
    pub fn dimension(&self) -> Option<VectorDimension> {
        self.dimension
    }

    /// Total number of rows, removed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of rows whose label has not been removed.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.len() - self.removed_rows
    }

    #[must_use]
    pub fn label_of(&self, row: RowIndex) -> Option<DocumentId> {
        self.labels.get(row.as_usize()).copied()
    }

    /// Values of a stored row.
    #[must_use]
    pub fn row(&self, row: RowIndex) -> Option<&[f32]> {
        let dim = self.dimension?.get();
        let start = row.as_usize().checked_mul(dim)?;
        self.values.get(start..start + dim)
    }

    #[must_use]
    pub fn is_removed(&self, label: DocumentId) -> bool {
        self.removed.contains(&label)
    }

    #[must_use]
    pub fn config(&self) -> PartitionConfig {
        self.config
    }

    /// Number of k-means clusters, 0 while the index is searched exhaustively.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.partition.as_ref().map_or(0, |p| p.centroids.len())
    }

    /// Checks `vector` against the index dimension without inserting it.
    ///
    /// An empty index accepts any non-empty vector.
    pub fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorError> {
        match self.dimension {
            Some(dimension) => dimension.validate_vector(vector),
            None => VectorDimension::new(vector.len()).map(|_| ()),
        }
    }

    /// Appends `vector` owned by `label` and returns its row.
    ///
    /// # Errors
    /// [`VectorError::DimensionMismatch`] when the length differs from the
    /// first inserted vector, [`VectorError::InvalidArgument`] for NaN or
    /// infinite values or when the row space is exhausted.
    pub fn insert(&mut self, vector: &[f32], label: DocumentId) -> Result<RowIndex, VectorError> {
        self.validate_row(vector)?;
        let row = self.push_row(vector, l2_norm(vector), label);
        if let Some(partition) = &mut self.partition {
            partition.assign(vector, row.value());
        }
        Ok(row)
    }

    /// Appends all `vectors` under one label, or none of them if any is
    /// invalid. Returns the row of the first vector.
    pub fn insert_many(
        &mut self,
        vectors: &[Vec<f32>],
        label: DocumentId,
    ) -> Result<Option<RowIndex>, VectorError> {
        self.validate_batch(vectors)?;

        let mut first = None;
        for vector in vectors {
            let row = self.insert(vector, label)?;
            first.get_or_insert(row);
        }
        Ok(first)
    }

    /// Checks that [`VectorIndex::insert_many`] would accept `vectors`.
    pub fn validate_batch(&self, vectors: &[Vec<f32>]) -> Result<(), VectorError> {
        for vector in vectors {
            self.validate_row(vector)?;
        }
        // An empty index takes its dimension from the first vector
        if let Some(first) = vectors.first() {
            for vector in &vectors[1..] {
                if vector.len() != first.len() {
                    return Err(VectorError::DimensionMismatch {
                        expected: first.len(),
                        actual: vector.len(),
                    });
                }
            }
        }
        if self.labels.len() + vectors.len() > u32::MAX as usize {
            return Err(VectorError::InvalidArgument(
                "vector index row space exhausted".to_string(),
            ));
        }
        Ok(())
    }

    /// Hides every row labelled `label` from future searches.
    pub fn remove_label(&mut self, label: DocumentId) {
        if self.removed.insert(label) {
            self.removed_rows += self.rows_per_label.get(&label).copied().unwrap_or(0);
        }
    }

    /// Returns up to `top_k` live rows by descending similarity to `query`.
    ///
    /// Ties are broken by the lower row. An empty index yields an empty list.
    ///
    /// # Errors
    /// [`VectorError::InvalidArgument`] for `top_k == 0`,
    /// [`VectorError::DimensionMismatch`] for a query of the wrong length.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>, VectorError> {
        if top_k == 0 {
            return Err(VectorError::InvalidArgument(
                "top_k must be greater than zero".to_string(),
            ));
        }
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        dimension.validate_vector(query)?;

        let query_norm = l2_norm(query);
        let mut scored: Vec<(f32, u32)> = Vec::new();

        match &self.partition {
            None => self.score_rows(query, query_norm, 0..self.labels.len() as u32, &mut scored),
            Some(partition) => {
                let mut order: Vec<(f32, usize)> = partition
                    .centroids
                    .iter()
                    .enumerate()
                    .map(|(i, centroid)| (cosine_similarity(query, centroid), i))
                    .collect();
                order.sort_unstable_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

                for (probed, &(_, cluster)) in order.iter().enumerate() {
                    if probed >= self.config.probe_clusters && scored.len() >= top_k {
                        break;
                    }
                    let members = partition.members[cluster].iter().copied();
                    self.score_rows(query, query_norm, members, &mut scored);
                }
            }
        }

        let by_rank = |a: &(f32, u32), b: &(f32, u32)| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1));
        if scored.len() > top_k {
            scored.select_nth_unstable_by(top_k - 1, by_rank);
            scored.truncate(top_k);
        }
        scored.sort_unstable_by(by_rank);

        Ok(scored
            .into_iter()
            .map(|(cosine, row)| Neighbor {
                row: RowIndex::new(row),
                confidence: Score::from_cosine(cosine),
            })
            .collect())
    }

    /// Builds a new index holding only the live rows whose label satisfies
    /// `keep`, preserving their relative order. `self` is left untouched.
    ///
    /// # Errors
    /// [`VectorError::Cancelled`] if `cancel` fires; the partial index is
    /// dropped.
    pub fn compacted(
        &self,
        keep: impl Fn(DocumentId) -> bool,
        cancel: &CancellationToken,
    ) -> Result<(VectorIndex, RowRemap), VectorError> {
        let mut next = VectorIndex::new(self.config);
        next.dimension = self.dimension;
        let mut remap = RowRemap::with_capacity(self.len());

        for (row, &label) in self.labels.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(VectorError::Cancelled);
            }
            if self.removed.contains(&label) || !keep(label) {
                remap.push(None);
                continue;
            }
            let values = self.row_values(row);
            remap.push(Some(next.push_row(values, self.norms[row], label)));
        }

        if next.needs_training() {
            next.retrain();
        }

        debug!(
            before = self.len(),
            after = next.len(),
            "compacted vector index"
        );
        Ok((next, remap))
    }

    /// Serializes the matrix. Removed labels are not recorded; the caller
    /// re-applies them after loading.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let rows = (0..self.len()).map(|row| (self.labels[row], self.row_values(row)));
        encode_matrix(self.dimension, rows)
    }

    /// Rebuilds an index from [`VectorIndex::to_bytes`] output, training the
    /// partition if the row count calls for it.
    pub fn from_bytes(bytes: &[u8], config: PartitionConfig) -> Result<Self, VectorError> {
        let header = read_header(bytes)?;
        let mut index = VectorIndex::new(config);
        index.dimension = header.dimension;
        index.values.reserve(header.rows * header.dimension.map_or(0, |d| d.get()));

        for (label, values) in decode_rows(bytes, &header) {
            if values.iter().any(|v| !v.is_finite()) {
                return Err(VectorError::InvalidFormat(format!(
                    "row {} contains non-finite values",
                    index.len()
                )));
            }
            let norm = l2_norm(&values);
            index.push_row(&values, norm, label);
        }

        if index.needs_training() {
            index.retrain();
        }
        Ok(index)
    }

    fn validate_row(&self, vector: &[f32]) -> Result<(), VectorError> {
        self.check_dimension(vector)?;
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(VectorError::InvalidArgument(
                "vector contains NaN or infinite values".to_string(),
            ));
        }
        if self.labels.len() >= u32::MAX as usize {
            return Err(VectorError::InvalidArgument(
                "vector index row space exhausted".to_string(),
            ));
        }
        Ok(())
    }

    /// Appends a validated row without touching the partition.
    fn push_row(&mut self, vector: &[f32], norm: f32, label: DocumentId) -> RowIndex {
        if self.dimension.is_none() {
            self.dimension = VectorDimension::new(vector.len()).ok();
        }
        let row = RowIndex::new(self.labels.len() as u32);
        self.values.extend_from_slice(vector);
        self.norms.push(norm);
        self.labels.push(label);
        *self.rows_per_label.entry(label).or_insert(0) += 1;
        if self.removed.contains(&label) {
            self.removed_rows += 1;
        }
        row
    }

    fn row_values(&self, row: usize) -> &[f32] {
        let dim = self.dimension.map_or(0, |d| d.get());
        &self.values[row * dim..(row + 1) * dim]
    }

    fn score_rows(
        &self,
        query: &[f32],
        query_norm: f32,
        rows: impl Iterator<Item = u32>,
        out: &mut Vec<(f32, u32)>,
    ) {
        for row in rows {
            let r = row as usize;
            if self.removed.contains(&self.labels[r]) {
                continue;
            }
            let norm = self.norms[r];
            let cosine = if query_norm == 0.0 || norm == 0.0 {
                0.0
            } else {
                dot(query, self.row_values(r)) / (query_norm * norm)
            };
            out.push((cosine, row));
        }
    }

    /// Whether the partition should be (re)trained: the index reached
    /// [`PartitionConfig::min_rows`] and doubled since the last training.
    #[must_use]
    pub fn needs_training(&self) -> bool {
        let rows = self.len();
        rows > 0 && rows >= self.config.min_rows && rows >= self.trained_rows.saturating_mul(2)
    }

    /// Trains k-means centroids over every current row without modifying
    /// the index.
    #[must_use]
    pub fn train_partition(&self) -> TrainedPartition {
        let n = self.len();
        TrainedPartition {
            partition: self.build_partition(n),
            rows: n,
            dimension: self.dimension,
        }
    }

    /// Adopts `trained`, assigning rows appended since it was trained.
    ///
    /// Returns `false` and leaves the index alone when `trained` does not
    /// describe a prefix of this index.
    pub fn install_partition(&mut self, trained: TrainedPartition) -> bool {
        if trained.rows > self.len() || trained.dimension != self.dimension {
            return false;
        }
        let mut partition = trained.partition;
        if let Some(partition) = &mut partition {
            for row in trained.rows..self.len() {
                partition.assign(self.row_values(row), row as u32);
            }
        }
        self.partition = partition;
        self.trained_rows = trained.rows;
        true
    }

    /// Trains and installs in one step.
    pub fn retrain(&mut self) {
        let trained = self.train_partition();
        self.install_partition(trained);
    }

    /// k-means over the first `n` rows, `None` if there are none or
    /// clustering fails.
    fn build_partition(&self, n: usize) -> Option<Partition> {
        if n == 0 {
            return None;
        }
        let k = ((n as f64).sqrt().ceil() as usize).clamp(MIN_CLUSTERS, MAX_CLUSTERS.min(n));
        let rows: Vec<&[f32]> = (0..n).map(|row| self.row_values(row)).collect();
        let mut rng = StdRng::seed_from_u64(n as u64);

        let result = match kmeans_clustering(&rows, k, &mut rng) {
            Err(ClusteringError::InitializationFailed) if k > 1 => {
                // Too few distinct directions for k centroids
                kmeans_clustering(&rows, 1, &mut rng)
            }
            other => other,
        };

        let centroids = match result {
            Ok(result) => result.centroids,
            Err(e) => {
                warn!(error = %e, rows = n, "could not partition vector index, searching exhaustively");
                return None;
            }
        };

        // Assign against the final centroids so every row sits in the
        // cluster a query for that exact vector would probe first
        let mut partition = Partition {
            members: vec![Vec::new(); centroids.len()],
            centroids,
        };
        for (row, values) in rows.iter().enumerate() {
            partition.assign(values, row as u32);
        }

        debug!(rows = n, clusters = partition.centroids.len(), "trained vector index partition");
        Some(partition)
    }
}

impl Partition {
    fn assign(&mut self, vector: &[f32], row: u32) {
        let centroid_refs: Vec<&[f32]> = self.centroids.iter().map(Vec::as_slice).collect();
        let cluster = assign_to_nearest_centroid(vector, &centroid_refs);
        self.members[cluster.index()].push(row);
    }
}
