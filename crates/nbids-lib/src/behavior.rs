use crate::events::EventKind;
use crate::io::table::Table;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Columns a behavior log must carry to be aligned (milliseconds, relative to
/// the task start).
pub const REQUIRED_COLUMNS: [&str; 4] = ["trial_start", "RT", "outcome_start", "startQuestion"];

/// Aligned time columns written next to every event.
pub const TIME_COLUMNS: [&str; 6] = [
    "start_event_time",
    "cue_time",
    "response_time",
    "feedback_time",
    "questions_time",
    "answers_time",
];

#[derive(Debug, Error)]
pub enum BehaviorError {
    #[error("behavior log is missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("behavior log has no trials")]
    Empty,
}

/// Behavior timestamps shifted onto the recording clock (milliseconds).
#[derive(Debug, Clone, Serialize)]
pub struct BehaviorTimings {
    pub start_event_time: f64,
    pub cue_time: Vec<Option<f64>>,
    pub response_time: Vec<Option<f64>>,
    pub feedback_time: Vec<Option<f64>>,
    pub questions_time: Vec<Option<f64>>,
    pub answers_time: Vec<Option<f64>>,
}

impl BehaviorTimings {
    pub fn len(&self) -> usize {
        self.cue_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cue_time.is_empty()
    }

    /// Reference column of an event type; `start` has none.
    pub fn column(&self, kind: EventKind) -> Option<&[Option<f64>]> {
        match kind {
            EventKind::Start => None,
            EventKind::Cue => Some(&self.cue_time),
            EventKind::Response => Some(&self.response_time),
            EventKind::Feedback => Some(&self.feedback_time),
            EventKind::Questions => Some(&self.questions_time),
            EventKind::Answers => Some(&self.answers_time),
        }
    }

    /// Values of `TIME_COLUMNS` for one trial, in the same order.
    pub fn row(&self, idx: usize) -> [Option<f64>; 6] {
        let at = |col: &[Option<f64>]| col.get(idx).copied().flatten();
        [
            Some(self.start_event_time),
            at(&self.cue_time),
            at(&self.response_time),
            at(&self.feedback_time),
            at(&self.questions_time),
            at(&self.answers_time),
        ]
    }
}

pub fn check_columns(log: &Table) -> Result<(), BehaviorError> {
    let missing = log.missing_columns(&REQUIRED_COLUMNS);
    if !missing.is_empty() {
        return Err(BehaviorError::MissingColumns(missing));
    }
    if log.is_empty() {
        return Err(BehaviorError::Empty);
    }
    Ok(())
}

/// Shift behavior timestamps by the start trigger time:
/// cue = trial_start, response = trial_start + RT, feedback = outcome_start,
/// questions = answers = startQuestion, each plus `start_offset_ms`.
pub fn align_timing(log: &Table, start_offset_ms: f64) -> Result<BehaviorTimings, BehaviorError> {
    check_columns(log)?;
    let column = |name: &str| {
        log.numeric_column(name)
            .ok_or_else(|| BehaviorError::MissingColumns(vec![name.to_string()]))
    };
    let trial_start = column("trial_start")?;
    let rt = column("RT")?;
    let outcome_start = column("outcome_start")?;
    let start_question = column("startQuestion")?;
    let shift = |values: &[Option<f64>]| -> Vec<Option<f64>> {
        values.iter().map(|v| v.map(|t| t + start_offset_ms)).collect()
    };
    let response_time = trial_start
        .iter()
        .zip(&rt)
        .map(|(start, rt)| Some(start.as_ref()? + rt.as_ref()? + start_offset_ms))
        .collect();
    Ok(BehaviorTimings {
        start_event_time: start_offset_ms,
        cue_time: shift(&trial_start),
        response_time,
        feedback_time: shift(&outcome_start),
        questions_time: shift(&start_question),
        answers_time: shift(&start_question),
    })
}

/// Rewrite a comma-separated behavior export as a BIDS `.tsv`.
pub fn convert_to_tsv(src: &Path, dest: &Path) -> Result<usize> {
    let table = Table::read_with_delimiter(src, b',')?;
    table.write_tsv(dest)?;
    Ok(table.len())
}

/// JSON sidecar for a behavior table.
pub fn write_sidecar(path: &Path, task: &str, description: &str) -> Result<()> {
    let metadata = serde_json::json!({
        "TaskName": task,
        "Description": description,
    });
    fs::write(path, serde_json::to_string_pretty(&metadata)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
