//! Configuration for vaultdex.
//!
//! Settings are layered:
//! - Default values
//! - TOML configuration file (`.vaultdex/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `VAULTDEX_` and use double
//! underscores to separate nested levels:
//! - `VAULTDEX_CHUNKING__CHUNK_SIZE=200` sets `chunking.chunk_size`
//! - `VAULTDEX_EMBEDDING__MODEL=hashing` sets `embedding.model`
//! - `VAULTDEX_SEARCH__TOP_K=10` sets `search.top_k`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chunking::ChunkConfig;
use crate::error::{IndexError, IndexResult};
use crate::vector::PartitionConfig;

const CONFIG_DIR: &str = ".vaultdex";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "VAULTDEX_";
const IGNORE_FILE: &str = ".vaultdexignore";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the index directory, relative paths resolve against the
    /// workspace root
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root directory (where .vaultdex is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Garbage collection settings
    #[serde(default)]
    pub gc: GcConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    /// Characters per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// Model to use for embeddings, or "hashing" for the offline embedder
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension of the hashing embedder. Real models report their own.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Show a progress bar while a model downloads
    #[serde(default = "default_true")]
    pub show_download_progress: bool,

    /// Where downloaded models are cached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    /// Results returned when the caller does not ask for a count
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Candidates fetched per requested result, to make up for tombstoned rows
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    /// Row count from which the index is partitioned into clusters
    #[serde(default = "default_partition_min_rows")]
    pub partition_min_rows: usize,

    /// Minimum clusters probed per query
    #[serde(default = "default_probe_clusters")]
    pub probe_clusters: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Number of parallel threads for embedding
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// File extensions treated as notes
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Patterns to ignore during indexing
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GcConfig {
    /// Share of tombstoned rows from which `compact --if-needed` runs
    #[serde(default = "default_tombstone_ratio")]
    pub tombstone_ratio: f64,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".vaultdex/index")
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_chunk_size() -> usize {
    100
}
fn default_overlap() -> usize {
    20
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_dimension() -> usize {
    384
}
fn default_top_k() -> usize {
    5
}
fn default_overfetch_factor() -> usize {
    2
}
fn default_partition_min_rows() -> usize {
    PartitionConfig::default().min_rows
}
fn default_probe_clusters() -> usize {
    PartitionConfig::default().probe_clusters
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_extensions() -> Vec<String> {
    vec!["md".to_string()]
}
fn default_tombstone_ratio() -> f64 {
    0.3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            debug: false,
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            indexing: IndexingConfig::default(),
            gc: GcConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_dimension(),
            show_download_progress: true,
            model_cache_dir: None,
        }
    }
}

impl EmbeddingConfig {
    /// Model cache directory, defaulting to the user cache dir
    pub fn cache_dir(&self) -> PathBuf {
        self.model_cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(CONFIG_DIR))
                .join("vaultdex")
                .join("models")
        })
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            overfetch_factor: default_overfetch_factor(),
            partition_min_rows: default_partition_min_rows(),
            probe_clusters: default_probe_clusters(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            extensions: default_extensions(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            tombstone_ratio: default_tombstone_ratio(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources, searching for `.vaultdex`
    /// upwards from the current directory
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let current = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::load_in(&current)
    }

    /// Load configuration for the workspace containing `start`
    pub fn load_in(start: &Path) -> Result<Self, Box<figment::Error>> {
        let workspace_root = Self::find_workspace_root(start);
        let config_path = workspace_root
            .as_ref()
            .map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
            .unwrap_or_else(|| start.join(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                // If workspace_root is not set in config, use the detected one
                if settings.workspace_root.is_none() {
                    settings.workspace_root = workspace_root;
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single underscores
            // stay inside field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the directory holding `.vaultdex`, searching from `start` up to root
    pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Index directory with relative paths resolved against the workspace root
    pub fn resolved_index_path(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.index_path.is_relative() => root.join(&self.index_path),
            _ => self.index_path.clone(),
        }
    }

    pub fn chunk_config(&self) -> IndexResult<ChunkConfig> {
        Ok(ChunkConfig::new(
            self.chunking.chunk_size,
            self.chunking.overlap,
        )?)
    }

    pub fn partition_config(&self) -> PartitionConfig {
        PartitionConfig {
            min_rows: self.search.partition_min_rows,
            probe_clusters: self.search.probe_clusters,
        }
    }

    /// Check values serde cannot, such as ranges and cross-field rules
    pub fn validate(&self) -> IndexResult<()> {
        fn invalid(reason: impl Into<String>) -> IndexResult<()> {
            Err(IndexError::InvalidConfiguration {
                reason: reason.into(),
            })
        }

        self.chunk_config()?;

        if self.embedding.model.trim().is_empty() {
            return invalid("embedding.model must not be empty");
        }
        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be greater than 0");
        }
        if self.search.top_k == 0 {
            return invalid("search.top_k must be greater than 0");
        }
        if self.search.overfetch_factor == 0 {
            return invalid("search.overfetch_factor must be at least 1");
        }
        if self.search.partition_min_rows == 0 {
            return invalid("search.partition_min_rows must be greater than 0");
        }
        if self.search.probe_clusters == 0 {
            return invalid("search.probe_clusters must be at least 1");
        }
        if self.indexing.parallel_threads == 0 {
            return invalid("indexing.parallel_threads must be greater than 0");
        }
        if self.indexing.extensions.is_empty() {
            return invalid("indexing.extensions must list at least one extension");
        }
        if !(self.gc.tombstone_ratio > 0.0 && self.gc.tombstone_ratio <= 1.0) {
            return invalid(format!(
                "gc.tombstone_ratio must be in (0, 1], got {}",
                self.gc.tombstone_ratio
            ));
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments in `root/.vaultdex`
    pub fn init_config_file(root: &Path, force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# vaultdex configuration file

# Version of the configuration schema
version = 1

# Path to the index directory (relative to workspace root)
index_path = ".vaultdex/index"

# Global debug mode
debug = false

[chunking]
# Characters per chunk and characters shared by neighbouring chunks.
# Changing either requires rebuilding the index.
chunk_size = 100
overlap = 20

[embedding]
# fastembed model name, or "hashing" for an offline embedder
model = "AllMiniLML6V2"

# Vector dimension of the "hashing" embedder
dimension = 384

show_download_progress = true

[search]
# Results returned by default
top_k = 5

# Candidates fetched per requested result
overfetch_factor = 2

# Index size from which vectors are clustered, and clusters probed per query
partition_min_rows = 4096
probe_clusters = 2

[indexing]
# Number of parallel threads for embedding (defaults to CPU count)
# parallel_threads = {}

extensions = ["md"]

# Additional patterns to ignore during indexing
ignore_patterns = []

[gc]
# `vaultdex compact --if-needed` runs once this share of rows is deleted
tombstone_ratio = 0.3
"#,
            num_cpus::get()
        );

        std::fs::write(&config_path, template)?;
        Self::create_default_ignore_file(root, force)?;

        Ok(config_path)
    }

    /// Create a default .vaultdexignore file
    fn create_default_ignore_file(root: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
        let ignore_path = root.join(IGNORE_FILE);

        if !force && ignore_path.exists() {
            return Ok(());
        }

        let default_content = r#"# vaultdex ignore patterns (gitignore syntax)
# https://git-scm.com/docs/gitignore

# Editor and sync leftovers
*.tmp
*.bak
*.swp
*~
.DS_Store

# Note app internals
.obsidian/
.trash/

# Example of excluding a folder of drafts:
# drafts/
"#;

        std::fs::write(&ignore_path, default_content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.index_path, PathBuf::from(".vaultdex/index"));
        assert_eq!(settings.chunking.chunk_size, 100);
        assert_eq!(settings.chunking.overlap, 20);
        assert_eq!(settings.search.top_k, 5);
        assert_eq!(settings.search.overfetch_factor, 2);
        assert_eq!(settings.indexing.extensions, vec!["md"]);
        assert!(settings.indexing.parallel_threads > 0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[chunking]
chunk_size = 200
overlap = 50

[embedding]
model = "hashing"
dimension = 64

[indexing]
parallel_threads = 4
ignore_patterns = ["drafts/**"]
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.chunking.chunk_size, 200);
        assert_eq!(settings.chunking.overlap, 50);
        assert_eq!(settings.embedding.model, "hashing");
        assert_eq!(settings.embedding.dimension, 64);
        assert_eq!(settings.indexing.parallel_threads, 4);
        assert_eq!(settings.indexing.ignore_patterns, vec!["drafts/**"]);
        // Untouched sections keep their defaults
        assert_eq!(settings.search.top_k, 5);
        assert_eq!(settings.indexing.extensions, vec!["md"]);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/settings.toml");

        let mut settings = Settings::default();
        settings.indexing.parallel_threads = 2;
        settings.gc.tombstone_ratio = 0.5;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.indexing.parallel_threads, 2);
        assert_eq!(loaded.gc.tombstone_ratio, 0.5);
    }

    #[test]
    fn test_layered_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        let nested = temp_dir.path().join("journal/2024");
        fs::create_dir_all(&nested).unwrap();

        let toml_content = r#"
[search]
probe_clusters = 3
partition_min_rows = 1000
"#;
        fs::write(config_dir.join(CONFIG_FILE), toml_content).unwrap();

        // Environment variable should override config file
        unsafe {
            std::env::set_var("VAULTDEX_SEARCH__PROBE_CLUSTERS", "7");
        }
        let settings = Settings::load_in(&nested).unwrap();
        unsafe {
            std::env::remove_var("VAULTDEX_SEARCH__PROBE_CLUSTERS");
        }

        assert_eq!(settings.search.probe_clusters, 7);
        assert_eq!(settings.search.partition_min_rows, 1000);
        assert_eq!(
            settings.workspace_root.as_deref(),
            Some(temp_dir.path())
        );
        assert_eq!(
            settings.resolved_index_path(),
            temp_dir.path().join(".vaultdex/index")
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.chunking.overlap = 100;
        assert!(matches!(
            settings.validate(),
            Err(IndexError::InvalidConfiguration { .. })
        ));

        let mut settings = Settings::default();
        settings.search.top_k = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.gc.tombstone_ratio = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.indexing.extensions.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_init_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = Settings::init_config_file(temp_dir.path(), false).unwrap();
        assert!(path.exists());
        assert!(temp_dir.path().join(IGNORE_FILE).exists());

        // The template must parse back into valid settings
        let settings = Settings::load_from(&path).unwrap();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.embedding.model, "AllMiniLML6V2");

        assert!(Settings::init_config_file(temp_dir.path(), false).is_err());
        assert!(Settings::init_config_file(temp_dir.path(), true).is_ok());
    }
}
