#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use vaultdex::vector::{EmbeddingGateway, VectorDimension, VectorError};
use vaultdex::{HashingEmbedder, RetrievalEngine, Settings, SourceProvider};

pub const TEST_DIMENSION: usize = 256;

/// A notes directory on disk that is removed when dropped.
pub struct TestVault {
    pub dir: TempDir,
}

impl TestVault {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn add_file(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.dir.path().join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&file_path, content).expect("Failed to write file");
        file_path
    }

    pub fn remove_file(&self, path: &str) {
        fs::remove_file(self.dir.path().join(path)).expect("Failed to remove file");
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Index directory inside the vault, the way `vaultdex init` lays it out.
    pub fn index_path(&self) -> PathBuf {
        self.dir.path().join(".vaultdex").join("index")
    }
}

/// Settings for the hashing embedder with small chunks.
pub fn hashing_settings() -> Settings {
    let mut settings = Settings::default();
    settings.embedding.model = "hashing".to_string();
    settings.embedding.dimension = TEST_DIMENSION;
    settings.chunking.chunk_size = 40;
    settings.chunking.overlap = 10;
    settings.indexing.parallel_threads = 2;
    settings
}

pub fn hashing_embedder() -> Arc<HashingEmbedder> {
    Arc::new(HashingEmbedder::new(
        VectorDimension::new(TEST_DIMENSION).expect("valid dimension"),
    ))
}

pub fn hashing_engine(source: Arc<dyn SourceProvider>) -> RetrievalEngine {
    RetrievalEngine::new(Arc::new(hashing_settings()), hashing_embedder(), source)
        .expect("Failed to create engine")
}

/// Unit vector along `axis`.
pub fn axis(dimension: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    v[axis] = 1.0;
    v
}

/// Embedder answering from a fixed table, for tests that need to know
/// exactly where every chunk lands.
#[derive(Debug)]
pub struct TableEmbedder {
    dimension: VectorDimension,
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dimension).expect("valid dimension"),
            table: HashMap::new(),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimension.get());
        self.table.insert(text.to_string(), vector);
        self
    }
}

impl EmbeddingGateway for TableEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        texts
            .iter()
            .map(|text| {
                self.table
                    .get(*text)
                    .cloned()
                    .ok_or_else(|| VectorError::EmbeddingFailed(format!("no vector for '{text}'")))
            })
            .collect()
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "table"
    }
}

/// Settings matching a [`TableEmbedder`]: four character chunks without
/// overlap, so an eight character note is exactly two chunks.
pub fn table_settings(dimension: usize) -> Settings {
    let mut settings = Settings::default();
    settings.embedding.model = "table".to_string();
    settings.embedding.dimension = dimension;
    settings.chunking.chunk_size = 4;
    settings.chunking.overlap = 0;
    settings.indexing.parallel_threads = 1;
    settings
}
