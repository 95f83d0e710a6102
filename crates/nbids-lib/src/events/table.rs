use super::kind::EventKind;
use crate::behavior::TIME_COLUMNS;
use crate::io::table::{format_number, Table};
use anyhow::Result;
use std::path::Path;

/// Columns every events table starts with.
pub const EVENT_COLUMNS: [&str; 4] = ["onset", "duration", "event_id", "trial_type"];

/// One reconciled event. Times are in seconds on the recording clock.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub onset: f64,
    pub duration: f64,
    pub kind: EventKind,
    /// Behavior row whose metadata was attached.
    pub behavior_row: Option<usize>,
    pub metadata: Vec<String>,
    /// Aligned behavior times in `TIME_COLUMNS` order.
    pub times: [Option<f64>; 6],
}

#[derive(Debug, Clone, Default)]
pub struct EventsTable {
    pub metadata_columns: Vec<String>,
    pub rows: Vec<EventRow>,
}

impl EventsTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.rows.iter().filter(|r| r.kind == kind).count()
    }

    /// Flatten into a generic table. Behavior columns that clash with the
    /// fixed event or time columns are left out.
    pub fn to_table(&self) -> Table {
        let reserved = |name: &str| EVENT_COLUMNS.contains(&name) || TIME_COLUMNS.contains(&name);
        let kept: Vec<usize> = self
            .metadata_columns
            .iter()
            .enumerate()
            .filter(|(_, name)| !reserved(name))
            .map(|(idx, _)| idx)
            .collect();

        let mut headers: Vec<String> = EVENT_COLUMNS.iter().map(|s| s.to_string()).collect();
        headers.extend(kept.iter().map(|&i| self.metadata_columns[i].clone()));
        headers.extend(TIME_COLUMNS.iter().map(|s| s.to_string()));

        let mut table = Table::new(headers);
        for row in &self.rows {
            let mut cells = vec![
                format_number(Some(row.onset)),
                format_number(Some(row.duration)),
                row.kind.id().to_string(),
                row.kind.name().to_string(),
            ];
            cells.extend(
                kept.iter()
                    .map(|&i| row.metadata.get(i).cloned().unwrap_or_else(|| "n/a".into())),
            );
            cells.extend(row.times.iter().map(|t| format_number(*t)));
            table.rows.push(cells);
        }
        table
    }

    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        self.to_table().write_tsv(path)
    }
}
