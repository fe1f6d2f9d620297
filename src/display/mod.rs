//! Terminal output for the CLI: tables, progress indicators and colors.

pub mod progress;
pub mod tables;
pub mod theme;

pub use progress::{create_progress_bar, create_spinner, with_spinner};
pub use tables::{create_gc_table, create_results_table, create_stats_table};
pub use theme::{THEME, Theme, Tone};
