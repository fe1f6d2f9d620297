//! Table formatting for search results and index figures.

use comfy_table::{
    Attribute, Cell, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_FULL,
};

use super::theme::THEME;
use crate::engine::{IndexStats, SimilarityResult};
use crate::gc::GcReport;

/// Longest chunk preview shown in a results table, in characters.
const PREVIEW_CHARS: usize = 80;

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        headers
            .iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
    table
}

/// Collapses whitespace and cuts the text to the preview length.
fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    }
}

/// Create a table of ranked search results.
pub fn create_results_table(results: &[SimilarityResult]) -> String {
    let mut table = new_table(&["#", "Score", "Note", "Chunk", "Text"]);

    for (rank, result) in results.iter().enumerate() {
        table.add_row(vec![
            Cell::new(rank + 1),
            Cell::new(format!("{:.3}", result.similarity))
                .fg(THEME.score_color(result.similarity)),
            Cell::new(result.path.display()),
            Cell::new(result.chunk_index),
            Cell::new(preview(&result.chunk_text)),
        ]);
    }

    table.to_string()
}

/// Create a two-column table of index figures.
pub fn create_stats_table(stats: &IndexStats) -> String {
    let mut table = new_table(&["Metric", "Value"]);

    let dimension = stats
        .dimension
        .map_or_else(|| "-".to_string(), |d| d.to_string());
    table.add_row(vec!["Notes", &stats.documents.to_string()]);
    table.add_row(vec!["Deleted notes", &stats.tombstoned_documents.to_string()]);
    table.add_row(vec!["Rows", &stats.total_rows.to_string()]);
    table.add_row(vec!["Live rows", &stats.live_rows.to_string()]);
    table.add_row(vec!["Model", &stats.model_name]);
    table.add_row(vec!["Dimension", &dimension]);
    table.add_row(vec!["Clusters", &stats.clusters.to_string()]);
    table.add_row(vec![
        "Chunking",
        &format!("{} chars, {} overlap", stats.chunk_size, stats.overlap),
    ]);

    let (garbage, color) = if stats.needs_compaction {
        (
            format!("{:.1}% (run 'vaultdex compact')", stats.tombstone_ratio * 100.0),
            Color::Yellow,
        )
    } else {
        (format!("{:.1}%", stats.tombstone_ratio * 100.0), Color::Reset)
    };
    table.add_row(vec![Cell::new("Deleted rows"), Cell::new(garbage).fg(color)]);

    table.to_string()
}

/// Create a summary table for one compaction.
pub fn create_gc_table(report: &GcReport) -> String {
    let mut table = new_table(&["Metric", "Value"]);
    table.add_row(vec!["Notes removed", &report.documents_removed.to_string()]);
    table.add_row(vec!["Rows removed", &report.rows_removed.to_string()]);
    table.add_row(vec!["Rows retained", &report.rows_retained.to_string()]);
    table.add_row(vec!["Time", &format!("{:?}", report.elapsed)]);
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentId;
    use std::path::PathBuf;

    #[test]
    fn test_results_table() {
        let results = vec![SimilarityResult {
            path: PathBuf::from("garden/tomatoes.md"),
            similarity: 0.81,
            chunk_text: "Tomatoes need\nfull sun".to_string(),
            document_id: DocumentId::new(3),
            chunk_index: 2,
            char_offset: 160,
        }];
        let table = create_results_table(&results);

        assert!(table.contains("garden/tomatoes.md"));
        assert!(table.contains("0.810"));
        assert!(table.contains("Tomatoes need full sun"));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(PREVIEW_CHARS + 10);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 1);
        assert!(cut.ends_with('…'));
    }
}
