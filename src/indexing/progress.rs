//! Progress reporting for bulk indexing operations

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

const MAX_RECORDED_ERRORS: usize = 100;

/// Outcome of a bulk indexing or sync run
#[derive(Debug, Default, Serialize)]
pub struct BulkReport {
    /// Documents embedded and inserted
    pub indexed: usize,

    /// Files skipped because their content hash did not change
    pub unchanged: usize,

    /// Files that failed to index
    pub failed: usize,

    /// Documents tombstoned because their file disappeared
    pub removed: usize,

    /// Chunks inserted into the vector index
    pub chunks: usize,

    /// Set when the run stopped early on cancellation
    pub cancelled: bool,

    pub elapsed: Duration,

    /// Errors encountered (limited to the first 100)
    pub errors: Vec<(PathBuf, String)>,

    #[serde(skip)]
    start_time: Option<Instant>,
}

impl BulkReport {
    /// Create a new report and start timing
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Stop timing and record elapsed time
    pub fn stop_timing(&mut self) {
        if let Some(start) = self.start_time.take() {
            self.elapsed = start.elapsed();
        }
    }

    pub fn add_error(&mut self, path: PathBuf, error: String) {
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push((path, error));
        }
        self.failed += 1;
    }

    /// Adds the counts and errors of a report for a later batch.
    pub fn absorb(&mut self, other: BulkReport) {
        self.indexed += other.indexed;
        self.unchanged += other.unchanged;
        self.removed += other.removed;
        self.chunks += other.chunks;
        self.cancelled |= other.cancelled;
        for (path, error) in other.errors {
            if self.errors.len() < MAX_RECORDED_ERRORS {
                self.errors.push((path, error));
            }
        }
        self.failed += other.failed;
    }

    /// Files looked at, whatever happened to them
    pub fn processed(&self) -> usize {
        self.indexed + self.unchanged + self.failed
    }

    /// Display the report in a human-readable format
    pub fn display(&self) {
        if self.cancelled {
            println!("\nIndexing cancelled:");
        } else {
            println!("\nIndexing complete:");
        }
        println!("  Notes indexed: {}", self.indexed);
        if self.unchanged > 0 {
            println!("  Notes unchanged: {}", self.unchanged);
        }
        if self.removed > 0 {
            println!("  Notes removed: {}", self.removed);
        }
        println!("  Notes failed: {}", self.failed);
        println!("  Chunks added: {}", self.chunks);
        println!("  Time elapsed: {:.2}s", self.elapsed.as_secs_f64());

        if self.indexed > 0 && self.elapsed.as_secs_f64() > 0.0 {
            let notes_per_sec = self.indexed as f64 / self.elapsed.as_secs_f64();
            println!("  Performance: {notes_per_sec:.0} notes/second");

            let chunks_per_note = self.chunks as f64 / self.indexed as f64;
            println!("  Average chunks/note: {chunks_per_note:.1}");
        }

        if !self.errors.is_empty() {
            println!("\nErrors (showing first {}):", self.errors.len().min(5));
            for (path, error) in &self.errors[..5.min(self.errors.len())] {
                println!("  {}: {}", path.display(), error);
            }
            if self.failed > 5 {
                println!("  ... and {} more errors", self.failed - 5);
            }
        }
    }
}
