use super::kind::{CountRule, EventKind};
use super::table::{EventRow, EventsTable};
use crate::behavior::{align_timing, check_columns, BehaviorError, BehaviorTimings};
use crate::config::AlignmentConfig;
use crate::io::table::Table;
use crate::io::triggers::load_triggers;
use crate::signal::TriggerTrain;
use anyhow::Context;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("found {0} start triggers, expected exactly one")]
    BadStart(usize),
    #[error("events need manual review, no reconstruction policy for: {}", names(.0))]
    ManualReview(Vec<EventKind>),
    #[error("no trigger found on any channel")]
    NoTriggers,
    #[error(transparent)]
    Behavior(#[from] BehaviorError),
}

fn names(kinds: &[EventKind]) -> String {
    kinds.iter().map(|k| k.name()).collect::<Vec<_>>().join(", ")
}

/// Trigger onsets of one run, per event type.
#[derive(Debug, Clone, Default)]
pub struct RunTriggers {
    pub sfreq: f64,
    pub trains: BTreeMap<EventKind, TriggerTrain>,
}

impl RunTriggers {
    pub fn new(sfreq: f64) -> Self {
        Self {
            sfreq,
            trains: BTreeMap::new(),
        }
    }

    /// Add onsets for a type, merging with any already present.
    pub fn insert(&mut self, kind: EventKind, train: TriggerTrain) {
        let merged = match self.trains.get(&kind) {
            Some(existing) => existing.merge(&train),
            None => train,
        };
        self.trains.insert(kind, merged);
    }

    pub fn get(&self, kind: EventKind) -> TriggerTrain {
        self.trains.get(&kind).cloned().unwrap_or_default()
    }

    /// Onsets in milliseconds on the recording clock.
    pub fn onsets_ms(&self, kind: EventKind) -> Vec<f64> {
        self.get(kind).onsets_ms(self.sfreq)
    }
}

/// Drop the first detected pulse of every channel but `start`.
///
/// The trigger hardware emits one pulse per line when acquisition starts and
/// it cannot be told apart from a genuine first trigger. Whether that pulse
/// is always present is not confirmed for every recording; the drop is
/// switchable through `drop_calibration_pulse`.
pub fn drop_calibration_pulse(kind: EventKind, onsets: &mut Vec<f64>) {
    if kind != EventKind::Start && !onsets.is_empty() {
        onsets.remove(0);
    }
}

/// Keep answers within `max_time_diff_s` of some question, and at most
/// `max_events` accepted answers inside any `time_window_s` span.
/// Keypad noise produces bursts of spurious answer triggers near real ones.
pub fn filter_answers_near_questions(
    questions: &[f64],
    answers: &[f64],
    cfg: &AlignmentConfig,
) -> Vec<f64> {
    let max_diff = cfg.max_time_diff_s * 1000.0;
    let window = cfg.time_window_s * 1000.0;
    let mut accepted: Vec<f64> = Vec::new();
    for &answer in answers {
        let near_question = questions.iter().any(|q| (answer - q).abs() <= max_diff);
        if !near_question {
            continue;
        }
        let recent = accepted.iter().filter(|&&t| answer - t <= window).count();
        if recent < cfg.max_events {
            accepted.push(answer);
        }
    }
    accepted
}

/// Outcome of the count check for one event type.
#[derive(Debug, Clone, Serialize)]
pub struct KindStatus {
    pub kind: EventKind,
    pub count: usize,
    pub rule: CountRule,
    pub detected: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Validation {
    pub statuses: Vec<KindStatus>,
}

impl Validation {
    pub fn all_detected(&self) -> bool {
        self.statuses.iter().all(|s| s.detected)
    }

    pub fn failed(&self) -> Vec<EventKind> {
        self.statuses
            .iter()
            .filter(|s| !s.detected)
            .map(|s| s.kind)
            .collect()
    }

    pub fn get(&self, kind: EventKind) -> Option<&KindStatus> {
        self.statuses.iter().find(|s| s.kind == kind)
    }
}

pub fn validate_counts(
    onsets: &BTreeMap<EventKind, Vec<f64>>,
    cfg: &AlignmentConfig,
) -> Validation {
    let statuses = EventKind::ALL
        .into_iter()
        .map(|kind| {
            let count = onsets.get(&kind).map_or(0, Vec::len);
            let rule = kind.count_rule(cfg);
            let detected = rule.accepts(count);
            info!(
                "{kind}: {count} occurrences ({rule}) {}",
                if detected { "ok" } else { "NOT DETECTED" }
            );
            KindStatus {
                kind,
                count,
                rule,
                detected,
            }
        })
        .collect();
    Validation { statuses }
}

/// Rebuild onsets of a type from its aligned behavior column. Only types
/// with a deterministic mapping qualify; others return `None`.
pub fn reconstruct_events(kind: EventKind, timings: &BehaviorTimings) -> Option<Vec<f64>> {
    if !kind.reconstructible() {
        return None;
    }
    let column = timings.column(kind)?;
    Some(column.iter().flatten().copied().collect())
}

/// Index of the row whose reference time is closest to `onset`. Rows without
/// a time are skipped; ties go to the earliest row. Several events may pick
/// the same row.
pub fn nearest_row(onset: f64, reference: &[Option<f64>]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, value) in reference.iter().enumerate() {
        let Some(t) = value else { continue };
        let diff = (onset - t).abs();
        if best.map_or(true, |(_, d)| diff < d) {
            best = Some((idx, diff));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Reconciled events of one run.
#[derive(Debug, Clone)]
pub struct AlignedRun {
    pub start_offset_ms: f64,
    pub validation: Validation,
    pub reconstructed: Vec<EventKind>,
    pub table: EventsTable,
}

/// Align one run's triggers with its behavior log.
///
/// Calibration pulses are dropped, spurious answers filtered and counts
/// validated. Failing cue/feedback onsets are rebuilt from behavior; any
/// other failing type aborts the run. Each event then receives the metadata
/// of its nearest behavior row, and the merged table is sorted by onset
/// (seconds). `start` anchors the clocks and is not itself listed.
pub fn align_run(
    triggers: &RunTriggers,
    log: &Table,
    cfg: &AlignmentConfig,
) -> Result<AlignedRun, AlignError> {
    check_columns(log)?;
    if triggers.trains.values().all(TriggerTrain::is_empty) {
        return Err(AlignError::NoTriggers);
    }

    let mut onsets: BTreeMap<EventKind, Vec<f64>> = BTreeMap::new();
    for kind in EventKind::ALL {
        let mut list = triggers.onsets_ms(kind);
        if cfg.drop_calibration_pulse {
            drop_calibration_pulse(kind, &mut list);
        }
        onsets.insert(kind, list);
    }
    let raw_answers = onsets.remove(&EventKind::Answers).unwrap_or_default();
    let answers = filter_answers_near_questions(&onsets[&EventKind::Questions], &raw_answers, cfg);
    debug!("answers kept after filtering: {}/{}", answers.len(), raw_answers.len());
    onsets.insert(EventKind::Answers, answers);

    let validation = validate_counts(&onsets, cfg);
    let start_count = onsets[&EventKind::Start].len();
    if start_count != 1 {
        return Err(AlignError::BadStart(start_count));
    }
    let unrecoverable: Vec<EventKind> = validation
        .failed()
        .into_iter()
        .filter(|k| !k.reconstructible())
        .collect();
    if !unrecoverable.is_empty() {
        return Err(AlignError::ManualReview(unrecoverable));
    }

    let start_offset_ms = onsets[&EventKind::Start][0];
    let timings = align_timing(log, start_offset_ms)?;

    let mut reconstructed = Vec::new();
    for kind in validation.failed() {
        if let Some(rebuilt) = reconstruct_events(kind, &timings) {
            warn!(
                "{kind}: rebuilding {} onsets from behavior (had {})",
                rebuilt.len(),
                onsets[&kind].len()
            );
            onsets.insert(kind, rebuilt);
            reconstructed.push(kind);
        }
    }

    let metadata_columns = if cfg.metadata_columns.is_empty() {
        log.headers.clone()
    } else {
        cfg.metadata_columns
            .iter()
            .filter(|c| log.column_index(c).is_some())
            .cloned()
            .collect()
    };
    let metadata_idx: Vec<usize> = metadata_columns
        .iter()
        .filter_map(|c| log.column_index(c))
        .collect();

    let mut rows = Vec::new();
    for (kind, list) in &onsets {
        let Some(reference) = timings.column(*kind) else {
            continue;
        };
        for &onset in list {
            let row = nearest_row(onset, reference);
            let metadata = metadata_idx
                .iter()
                .map(|&col| {
                    row.and_then(|r| log.cell(r, col))
                        .unwrap_or_default()
                        .to_string()
                })
                .collect();
            let times = row
                .map(|r| timings.row(r))
                .unwrap_or([Some(timings.start_event_time), None, None, None, None, None])
                .map(|t| t.map(|ms| ms / 1000.0));
            rows.push(EventRow {
                onset: onset / 1000.0,
                duration: 0.0,
                kind: *kind,
                behavior_row: row,
                metadata,
                times,
            });
        }
    }
    rows.sort_by(|a, b| a.onset.total_cmp(&b.onset));

    Ok(AlignedRun {
        start_offset_ms,
        validation,
        reconstructed,
        table: EventsTable {
            metadata_columns,
            rows,
        },
    })
}

/// Align one run from files: behavior log, trigger source (EDF or trigger
/// table), events table written to `out`.
pub fn align_files(
    behavior: &Path,
    triggers: &Path,
    out: &Path,
    cfg: &AlignmentConfig,
) -> anyhow::Result<AlignedRun> {
    let log = Table::read(behavior)?;
    let run_triggers = load_triggers(triggers, cfg)?;
    let aligned = align_run(&run_triggers, &log, cfg)
        .with_context(|| format!("aligning {}", behavior.display()))?;
    if let Some(dir) = out.parent() {
        fs::create_dir_all(dir)?;
    }
    aligned.table.write_tsv(out)?;
    info!(
        "{}: {} events written ({} reconstructed types)",
        out.display(),
        aligned.table.len(),
        aligned.reconstructed.len()
    );
    Ok(aligned)
}
