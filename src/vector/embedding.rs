//! Text embedding gateways.
//!
//! [`EmbeddingGateway`] is the seam between the retrieval engine and the
//! model that turns text into vectors. Two implementations ship:
//!
//! - [`FastEmbedGateway`] runs a local ONNX model through fastembed
//!   (all-MiniLM-L6-v2 by default, 384 dimensions). The model is downloaded
//!   into the cache directory on first use.
//! - [`HashingEmbedder`] hashes word tokens into a fixed number of buckets.
//!   It needs no model files, is fully deterministic, and is what the tests
//!   and offline setups use. Texts sharing words land close together, which
//!   is enough for keyword-flavoured similarity but carries no semantics.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::vector::clustering::normalize_vector;
use crate::vector::types::{VectorDimension, VectorError};

/// Model name selecting the [`HashingEmbedder`].
pub const HASHING_MODEL_NAME: &str = "hashing";

/// Turns text into fixed-length vectors.
///
/// Implementations must be thread-safe: bulk indexing calls them from the
/// rayon pool. Every returned vector has exactly [`dimension`] values.
///
/// [`dimension`]: EmbeddingGateway::dimension
pub trait EmbeddingGateway: Send + Sync {
    /// Embeds a batch of texts, one vector per input in input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Embeds a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.embed_batch(&[text])?.pop().ok_or_else(|| {
            VectorError::EmbeddingFailed("Model returned no embedding".to_string())
        })
    }

    fn dimension(&self) -> VectorDimension;

    /// Name recorded in the index metadata.
    fn model_name(&self) -> &str;
}

/// fastembed-backed gateway.
pub struct FastEmbedGateway {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
    model_name: String,
}

impl std::fmt::Debug for FastEmbedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedGateway")
            .field("model", &self.model_name)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedGateway {
    /// Loads `model`, downloading it into `cache_dir` if needed.
    ///
    /// # Errors
    /// Returns [`VectorError::EmbeddingFailed`] if the model fails to
    /// initialize or download.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let model = parse_embedding_model(model_name)?;

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        // Probe the output width instead of trusting a table
        let probe = text_model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| VectorError::EmbeddingFailed(format!("Failed to probe model: {e}")))?;
        let width = probe.first().map_or(0, Vec::len);
        let dimension = VectorDimension::new(width)?;

        debug!(model = model_name, dimension = width, "embedding model loaded");

        Ok(Self {
            model: Mutex::new(text_model),
            dimension,
            model_name: model_name.to_string(),
        })
    }
}

impl EmbeddingGateway for FastEmbedGateway {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Feature-hashing embedder.
///
/// Lowercased alphanumeric tokens are hashed with SHA-256 into one of
/// `dimension` buckets with a hash-derived sign, then the vector is scaled
/// to unit length. Text without tokens embeds to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: VectorDimension,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut embedding = vec![0.0f32; dim];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        normalize_vector(&mut embedding);
        embedding
    }
}

impl EmbeddingGateway for HashingEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        HASHING_MODEL_NAME
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Maps a configured model name onto a fastembed model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML6V2Q" => Ok(EmbeddingModel::AllMiniLML6V2Q),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        other => Err(VectorError::EmbeddingFailed(format!(
            "Unknown embedding model '{other}'. Supported: AllMiniLML6V2, AllMiniLML6V2Q, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MultilingualE5Small, {HASHING_MODEL_NAME}"
        ))),
    }
}

/// Builds the gateway selected by the embedding configuration.
pub fn create_gateway(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingGateway>, VectorError> {
    if config.model == HASHING_MODEL_NAME {
        let dimension = VectorDimension::new(config.dimension)?;
        return Ok(Arc::new(HashingEmbedder::new(dimension)));
    }

    Ok(Arc::new(FastEmbedGateway::new(
        &config.model,
        config.cache_dir(),
        config.show_download_progress,
    )?))
}
