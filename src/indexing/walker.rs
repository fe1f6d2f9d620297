//! File system walker for discovering notes to index
//!
//! Traversal respects:
//! - .gitignore rules, also outside git repositories
//! - `.vaultdexignore` files
//! - `indexing.ignore_patterns` from the settings
//! - `indexing.extensions`, compared case-insensitively
//!
//! Hidden files and directories are skipped, which keeps the index
//! directory itself out of the walk.

use crate::Settings;
use crate::error::{IndexError, IndexResult};
use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const IGNORE_FILENAME: &str = ".vaultdexignore";

/// Walks directories to find notes to index
#[derive(Debug)]
pub struct FileWalker {
    settings: Arc<Settings>,
}

impl FileWalker {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Walk a directory and return the matching files in a stable order.
    ///
    /// Fails only when an ignore pattern from the settings is not a valid
    /// glob; unreadable entries are skipped.
    pub fn walk(&self, root: &Path) -> IndexResult<Vec<PathBuf>> {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false)
            .sort_by_file_path(|a, b| a.cmp(b))
            .add_custom_ignore_filename(IGNORE_FILENAME)
            .overrides(self.build_overrides(root)?);

        let extensions: Vec<String> = self
            .settings
            .indexing
            .extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        Ok(builder
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(|entry| entry.into_path())
            .filter(|path| has_extension(path, &extensions))
            .collect())
    }

    /// Count files that would be indexed (useful for dry runs)
    pub fn count_files(&self, root: &Path) -> IndexResult<usize> {
        Ok(self.walk(root)?.len())
    }

    // Overrides whitelist by default; a leading '!' turns a glob into an
    // exclusion, which is what the ignore patterns mean.
    fn build_overrides(&self, root: &Path) -> IndexResult<Override> {
        let mut builder = OverrideBuilder::new(root);
        for pattern in &self.settings.indexing.ignore_patterns {
            builder
                .add(&format!("!{pattern}"))
                .map_err(|e| IndexError::InvalidConfiguration {
                    reason: format!("invalid ignore pattern '{pattern}': {e}"),
                })?;
        }
        builder.build().map_err(|e| IndexError::InvalidConfiguration {
            reason: format!("invalid ignore patterns: {e}"),
        })
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}
