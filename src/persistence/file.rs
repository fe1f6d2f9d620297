//! File-backed persistence.
//!
//! Layout of the index directory:
//!
//! - `CURRENT`: name of the generation directory holding the live index
//! - `gen-<n>/registry.json`: documents, tombstones and the next id
//! - `gen-<n>/pointers.json`: the pointer table
//! - `gen-<n>/vectors.bin`: the vector matrix, memory-mapped on load
//! - `gen-<n>/index.meta`: [`IndexMetadata`]
//!
//! A save writes and fsyncs a complete new generation next to the live
//! one, then switches `CURRENT` over with a single rename. Until that
//! rename the previous generation stays the one that loads; after it the
//! new one does. Generations that are no longer current are removed once
//! the switch succeeded.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{IndexMetadata, PersistedState, PersistenceAdapter, PersistenceError, VectorBytes};
use crate::vector::MappedMatrix;

const CURRENT_FILE: &str = "CURRENT";
const GENERATION_PREFIX: &str = "gen-";
const REGISTRY_FILE: &str = "registry.json";
const POINTERS_FILE: &str = "pointers.json";
const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "index.meta";

/// Persists the index as files under `base_path`.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    base_path: PathBuf,
}

impl FilePersistence {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Whether a complete index has been saved here.
    pub fn exists(&self) -> bool {
        self.base_path.join(CURRENT_FILE).is_file()
    }

    /// Directory of the live generation, `None` before the first save.
    pub fn current_dir(&self) -> Result<Option<PathBuf>, PersistenceError> {
        let pointer = self.base_path.join(CURRENT_FILE);
        if !pointer.exists() {
            return Ok(None);
        }
        let value = fs::read_to_string(&pointer).map_err(|source| PersistenceError::Read {
            path: pointer.clone(),
            source,
        })?;
        let name = value.trim();
        if parse_generation(name).is_none() {
            return Err(PersistenceError::BadPointer {
                path: pointer,
                value,
            });
        }
        Ok(Some(self.base_path.join(name)))
    }

    /// Reads only the metadata, without mapping vectors.
    pub fn load_metadata(&self) -> Result<Option<IndexMetadata>, PersistenceError> {
        match self.current_dir()? {
            Some(dir) => read_json(&require(&dir, METADATA_FILE)?).map(Some),
            None => Ok(None),
        }
    }

    /// Generation numbers of every `gen-<n>` directory, complete or not.
    fn generations(&self) -> Result<Vec<(u64, PathBuf)>, PersistenceError> {
        let entries = fs::read_dir(&self.base_path).map_err(|source| PersistenceError::Read {
            path: self.base_path.clone(),
            source,
        })?;
        Ok(entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let number = parse_generation(entry.file_name().to_str()?)?;
                Some((number, entry.path()))
            })
            .collect())
    }

    /// Points `CURRENT` at `name` with one rename.
    fn switch_to(&self, name: &str) -> Result<(), PersistenceError> {
        let target = self.base_path.join(CURRENT_FILE);
        let temp = self.base_path.join(format!("{CURRENT_FILE}.tmp"));
        write_synced(&temp, name.as_bytes())?;
        fs::rename(&temp, &target).map_err(|source| PersistenceError::Write {
            path: target.clone(),
            source,
        })
    }

    /// Removes every generation except `keep`. Failures only cost disk space.
    fn prune(&self, keep: u64) {
        let generations = match self.generations() {
            Ok(generations) => generations,
            Err(e) => {
                warn!(error = %e, "could not list old index generations");
                return;
            }
        };
        for (number, dir) in generations {
            if number == keep {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %e, "could not remove old index generation");
            }
        }
    }
}

impl PersistenceAdapter for FilePersistence {
    fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.base_path).map_err(|source| PersistenceError::Write {
            path: self.base_path.clone(),
            source,
        })?;

        // Above every directory on disk, including leftovers of failed saves
        let number = self
            .generations()?
            .iter()
            .map(|(number, _)| number + 1)
            .max()
            .unwrap_or(1);
        let name = generation_name(number);
        let dir = self.base_path.join(&name);

        let written = write_generation(&dir, state).and_then(|()| self.switch_to(&name));
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                debug!(path = %dir.display(), error = %cleanup, "left failed generation behind");
            }
            return Err(e);
        }
        // The new generation is current from here on
        sync_dir(&self.base_path)?;
        self.prune(number);

        debug!(
            path = %dir.display(),
            documents = state.registry.documents.len(),
            vector_bytes = state.vectors.len(),
            "saved index"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        let Some(dir) = self.current_dir()? else {
            return Ok(None);
        };

        let metadata = read_json(&require(&dir, METADATA_FILE)?)?;
        let registry = read_json(&require(&dir, REGISTRY_FILE)?)?;
        let pointers = read_json(&require(&dir, POINTERS_FILE)?)?;
        let vectors = MappedMatrix::open(&require(&dir, VECTORS_FILE)?)?;

        debug!(path = %dir.display(), rows = vectors.header().rows, "loaded index");
        Ok(Some(PersistedState {
            registry,
            pointers,
            vectors: VectorBytes::Mapped(vectors),
            metadata,
        }))
    }
}

fn generation_name(number: u64) -> String {
    format!("{GENERATION_PREFIX}{number:08}")
}

fn parse_generation(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(GENERATION_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Writes all four artifacts into the fresh directory `dir`.
fn write_generation(dir: &Path, state: &PersistedState) -> Result<(), PersistenceError> {
    fs::create_dir(dir).map_err(|source| PersistenceError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    write_synced(&dir.join(VECTORS_FILE), &state.vectors)?;
    write_synced(
        &dir.join(POINTERS_FILE),
        &to_json(&state.pointers, "pointer table")?,
    )?;
    write_synced(&dir.join(REGISTRY_FILE), &to_json(&state.registry, "registry")?)?;
    write_synced(&dir.join(METADATA_FILE), &to_json(&state.metadata, "metadata")?)?;
    sync_dir(dir)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let write = || -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    write().map_err(|source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn sync_dir(path: &Path) -> Result<(), PersistenceError> {
    #[cfg(unix)]
    {
        File::open(path)
            .and_then(|dir| dir.sync_all())
            .map_err(|source| PersistenceError::Write {
                path: path.to_path_buf(),
                source,
            })?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

fn require(dir: &Path, name: &'static str) -> Result<PathBuf, PersistenceError> {
    let path = dir.join(name);
    if path.exists() {
        Ok(path)
    } else {
        Err(PersistenceError::Incomplete {
            path: dir.to_path_buf(),
            missing: name,
        })
    }
}

fn to_json<T: Serialize>(value: &T, what: &'static str) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Encode { what, source })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let bytes = fs::read(path).map_err(|source| PersistenceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Decode {
        path: path.to_path_buf(),
        source,
    })
}
