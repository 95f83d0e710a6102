use super::kind::EventKind;
use crate::io::table::{format_number, round_cell, Table};
use anyhow::Result;
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("events table is missing column '{0}'")]
    MissingColumn(String),
    #[error("row {row}: no behavior reference for event_id '{event_id}'")]
    Unexplained { row: usize, event_id: String },
}

/// Events table annotated with inter-event intervals.
///
/// `onset_diff` is the interval between consecutive onsets of the same type,
/// `behtime_diff` the same interval on the type's behavior column, and
/// `timing_diff = behtime_diff - onset_diff`. The first event of every type
/// gets 0 in both.
#[derive(Debug, Clone)]
pub struct CheckedEvents {
    pub table: Table,
    pub kinds: Vec<EventKind>,
    pub onset_diff: Vec<f64>,
    pub behtime_diff: Vec<f64>,
    pub timing_diff: Vec<f64>,
    pub keep: Vec<bool>,
}

impl CheckedEvents {
    pub fn removed(&self) -> usize {
        self.keep.iter().filter(|k| !**k).count()
    }

    /// Rows that passed, with the diff columns appended and numbers rounded to
    /// three decimals.
    pub fn filtered(&self) -> Table {
        let mut annotated = self.table.clone();
        annotated.set_column("onset_diff", self.onset_diff.iter().map(|v| format_number(Some(*v))).collect());
        annotated.set_column("behtime_diff", self.behtime_diff.iter().map(|v| format_number(Some(*v))).collect());
        annotated.set_column("timing_diff", self.timing_diff.iter().map(|v| format_number(Some(*v))).collect());
        annotated.rows = annotated
            .rows
            .into_iter()
            .zip(&self.keep)
            .filter(|(_, keep)| **keep)
            .map(|(row, _)| row.iter().map(|c| round_cell(c, 3)).collect())
            .collect();
        annotated
    }

    /// `(behtime_diff, onset_diff)` pairs of one type, before or after filtering.
    pub fn diff_pairs(&self, kind: EventKind, after_filter: bool) -> Vec<(f64, f64)> {
        (0..self.kinds.len())
            .filter(|&i| self.kinds[i] == kind && (!after_filter || self.keep[i]))
            .map(|i| (self.behtime_diff[i], self.onset_diff[i]))
            .collect()
    }
}

/// Compute inter-event intervals and flag cue/response/feedback rows whose
/// recording and behavior intervals disagree by more than `tolerance_s`.
/// Question and answer rows are never removed.
pub fn check_timing(events: &Table, tolerance_s: f64) -> Result<CheckedEvents, CheckError> {
    let column = |name: &str| {
        events
            .column_index(name)
            .ok_or_else(|| CheckError::MissingColumn(name.to_string()))
    };
    let onset_idx = column("onset")?;
    let id_idx = column("event_id")?;

    let mut kinds = Vec::with_capacity(events.len());
    let mut reference = Vec::with_capacity(events.len());
    for (row_idx, row) in events.rows.iter().enumerate() {
        let id_cell = row[id_idx].trim();
        let kind = id_cell
            .parse::<f64>()
            .ok()
            .and_then(|id| EventKind::from_id(id as i64))
            .filter(|k| k.behavior_column().is_some());
        let unexplained = || CheckError::Unexplained {
            row: row_idx + 1,
            event_id: id_cell.to_string(),
        };
        let kind = kind.ok_or_else(unexplained)?;
        let time_col = kind.behavior_column().ok_or_else(unexplained)?;
        let onset = events.cell(row_idx, onset_idx).and_then(crate::io::table::parse_number);
        let behtime = events
            .column_index(time_col)
            .and_then(|idx| events.cell(row_idx, idx))
            .and_then(crate::io::table::parse_number);
        match (onset, behtime) {
            (Some(onset), Some(behtime)) => reference.push((onset, behtime)),
            _ => return Err(unexplained()),
        }
        kinds.push(kind);
    }

    let mut previous: HashMap<EventKind, (f64, f64)> = HashMap::new();
    let mut onset_diff = Vec::with_capacity(kinds.len());
    let mut behtime_diff = Vec::with_capacity(kinds.len());
    for (kind, &(onset, behtime)) in kinds.iter().zip(&reference) {
        let (d_onset, d_beh) = match previous.insert(*kind, (onset, behtime)) {
            Some((prev_onset, prev_beh)) => (onset - prev_onset, behtime - prev_beh),
            None => (0.0, 0.0),
        };
        onset_diff.push(d_onset);
        behtime_diff.push(d_beh);
    }
    let timing_diff: Vec<f64> = behtime_diff
        .iter()
        .zip(&onset_diff)
        .map(|(b, o)| b - o)
        .collect();
    let keep = kinds
        .iter()
        .zip(&timing_diff)
        .map(|(kind, diff)| !kind.timing_checked() || diff.abs() <= tolerance_s)
        .collect();

    let checked = CheckedEvents {
        table: events.clone(),
        kinds,
        onset_diff,
        behtime_diff,
        timing_diff,
        keep,
    };
    info!("{} of {} events flagged as incoherent", checked.removed(), checked.kinds.len());
    Ok(checked)
}

/// `sub-01_..._events.tsv` -> `sub-01_..._events_filtered.tsv`
pub fn filtered_path(events_path: &Path) -> PathBuf {
    let stem = events_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = events_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    events_path.with_file_name(format!("{stem}_filtered{ext}"))
}

pub fn write_filtered(checked: &CheckedEvents, events_path: &Path) -> Result<PathBuf> {
    let out = filtered_path(events_path);
    checked.filtered().write_tsv(&out)?;
    Ok(out)
}

/// `<root>/sub-X/ses-Y/run-Z` for an events file carrying those entities.
pub fn plot_dir(root: &Path, events_path: &Path) -> Option<PathBuf> {
    let name = events_path.file_name()?.to_string_lossy();
    let caps = regex!(r"sub-([A-Za-z0-9]+)_ses-([A-Za-z0-9]+)_.*run-([A-Za-z0-9]+)").captures(&name)?;
    Some(
        root.join(format!("sub-{}", &caps[1]))
            .join(format!("ses-{}", &caps[2]))
            .join(format!("run-{}", &caps[3])),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> Table {
        let text = "onset\tduration\tevent_id\tcue_time\tresponse_time\tfeedback_time\tquestions_time\tanswers_time\n\
                    1.0\t0\t5\t1.0\t1.4\t2.0\tn/a\tn/a\n\
                    1.4\t0\t10\t1.0\t1.4\t2.0\tn/a\tn/a\n\
                    2.0\t0\t15\t1.0\t1.4\t2.0\tn/a\tn/a\n\
                    5.0\t0\t5\t5.0\t5.5\t6.0\tn/a\tn/a\n\
                    5.55\t0\t10\t5.0\t5.5\t6.0\tn/a\tn/a\n\
                    6.004\t0\t15\t5.0\t5.5\t6.0\tn/a\tn/a\n\
                    7.0\t0\t20\t5.0\t5.5\t6.0\t7.0\t7.0\n\
                    8.0\t0\t25\t5.0\t5.5\t6.0\t7.0\t7.0\n";
        Table::from_reader(text.as_bytes(), b'\t').unwrap()
    }

    #[test]
    fn first_event_of_each_type_has_zero_diffs() {
        let checked = check_timing(&events(), 0.01).unwrap();
        for kind in [EventKind::Cue, EventKind::Response, EventKind::Feedback, EventKind::Questions] {
            let first = checked.kinds.iter().position(|k| *k == kind).unwrap();
            assert_eq!(checked.onset_diff[first], 0.0);
            assert_eq!(checked.behtime_diff[first], 0.0);
        }
    }

    #[test]
    fn incoherent_response_is_removed() {
        let checked = check_timing(&events(), 0.01).unwrap();
        // response interval 4.15 s on the recording vs 4.1 s in behavior
        assert_eq!(checked.keep, vec![true, true, true, true, false, true, true, true]);
        let filtered = checked.filtered();
        assert_eq!(filtered.len(), 7);
        let timing = filtered.column_index("timing_diff").unwrap();
        assert_eq!(filtered.rows[4][timing], "-0.004");
    }

    #[test]
    fn answers_are_never_filtered() {
        let mut table = events();
        table.rows[7][0] = "30.0".into();
        let checked = check_timing(&table, 0.01).unwrap();
        assert!(checked.keep[7]);
    }

    #[test]
    fn start_rows_are_unexplained() {
        let mut table = events();
        table.rows[0][2] = "1".into();
        let err = check_timing(&table, 0.01).unwrap_err();
        assert!(matches!(err, CheckError::Unexplained { row: 1, .. }));
    }

    #[test]
    fn paths_follow_events_file() {
        let path = Path::new("/bids/sub-01/ses-02/meg/sub-01_ses-02_task-explore_run-3_events.tsv");
        assert_eq!(
            filtered_path(path),
            Path::new("/bids/sub-01/ses-02/meg/sub-01_ses-02_task-explore_run-3_events_filtered.tsv")
        );
        assert_eq!(
            plot_dir(Path::new("saved_plots"), path).unwrap(),
            Path::new("saved_plots/sub-01/ses-02/run-3")
        );
        assert!(plot_dir(Path::new("p"), Path::new("sub-01_events.tsv")).is_none());
    }
}
