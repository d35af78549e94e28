//! Table builder wrapper around comfy-table for consistent list display.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use console::{style, StyledObject};

use crate::domain::models::ReadinessMode;

/// Create a standard list table with the given headers.
///
/// Uses the NOTHING preset (no borders) for a clean CLI aesthetic.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Render the table to string with a count header.
pub fn render_list(entity_name: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {entity_name}s found.");
    }
    let noun = if total == 1 {
        entity_name.to_string()
    } else {
        format!("{entity_name}s")
    };
    format!("{} {noun}:\n{table}", style(total).bold())
}

/// Readiness mode colored by how usable the capture is.
pub fn colorize_mode(mode: ReadinessMode) -> StyledObject<&'static str> {
    let text = mode.as_str();
    match mode {
        ReadinessMode::CanonicalReady => style(text).green().bold(),
        ReadinessMode::DegradedManualOnly => style(text).yellow(),
        ReadinessMode::Awaiting => style(text).blue(),
        ReadinessMode::Unknown => style(text).dim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list() {
        let table = list_table(&["conversation"]);
        assert_eq!(render_list("conversation", &table, 0), "No conversations found.");
    }

    #[test]
    fn test_list_has_headers() {
        let mut table = list_table(&["conversation", "mode"]);
        table.add_row(vec!["c1", "awaiting"]);
        let rendered = render_list("conversation", &table, 1);
        assert!(rendered.contains("CONVERSATION"));
        assert!(rendered.contains("c1"));
    }
}
