use crate::config::AlignmentConfig;
use crate::events::{EventKind, RunTriggers};
use crate::io::table::Table;
use crate::signal::TriggerTrain;
use anyhow::{anyhow, Context, Result};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Stim channel label -> event type, from the `channels` config map.
pub fn channel_map(cfg: &AlignmentConfig) -> HashMap<String, EventKind> {
    let mut map = HashMap::new();
    for (name, labels) in &cfg.channels {
        match EventKind::from_name(name) {
            Some(kind) => {
                for label in labels {
                    map.insert(label.clone(), kind);
                }
            }
            None => debug!("ignoring channel mapping for unknown event '{name}'"),
        }
    }
    map
}

/// Read a trigger table: a `sample` column plus either an `event` column
/// (event names) or a `channel` column (stim channel labels resolved through
/// the config). Rows on unmapped channels are ignored.
pub fn read_trigger_table(path: &Path, cfg: &AlignmentConfig) -> Result<RunTriggers> {
    let table = Table::read(path)?;
    triggers_from_table(&table, cfg).with_context(|| format!("parsing triggers {}", path.display()))
}

pub fn triggers_from_table(table: &Table, cfg: &AlignmentConfig) -> Result<RunTriggers> {
    let sample_idx = table
        .column_index("sample")
        .ok_or_else(|| anyhow!("trigger table must include a sample column"))?;
    let event_idx = table.column_index("event");
    let channel_idx = table.column_index("channel");
    if event_idx.is_none() && channel_idx.is_none() {
        return Err(anyhow!("trigger table needs an event or a channel column"));
    }
    let channels = channel_map(cfg);
    let mut samples: BTreeMap<EventKind, Vec<u64>> = BTreeMap::new();
    for (row_idx, row) in table.rows.iter().enumerate() {
        let kind = match (event_idx, channel_idx) {
            (Some(idx), _) => EventKind::from_name(&row[idx]),
            (None, Some(idx)) => channels.get(row[idx].trim()).copied(),
            (None, None) => None,
        };
        let Some(kind) = kind else {
            debug!("row {}: no event type for trigger, skipped", row_idx + 1);
            continue;
        };
        let sample: u64 = row[sample_idx]
            .trim()
            .parse()
            .with_context(|| format!("row {}: sample is not an integer", row_idx + 1))?;
        samples.entry(kind).or_default().push(sample);
    }
    let mut triggers = RunTriggers::new(cfg.sfreq);
    for (kind, list) in samples {
        triggers.insert(kind, TriggerTrain::from_samples(list));
    }
    Ok(triggers)
}

/// Triggers from an EDF recording's stim channels or from a trigger table,
/// by extension.
pub fn load_triggers(path: &Path, cfg: &AlignmentConfig) -> Result<RunTriggers> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "edf" => super::eeg::load_edf_triggers(path, cfg),
        _ => read_trigger_table(path, cfg),
    }
}

/// Trigger source of a run, next to its behavior file:
/// `<ses>/beh/<base>_beh.tsv` -> `<ses>/<datatype>/<base>_triggers.tsv`, or
/// the `<base>_<datatype>.edf` recording.
pub fn locate_triggers(behavior: &Path, datatype: &str) -> Option<PathBuf> {
    let name = behavior.file_name()?.to_string_lossy();
    let base = name.strip_suffix("_beh.tsv")?;
    let dir = behavior.parent()?.parent()?.join(datatype);
    [
        format!("{base}_triggers.tsv"),
        format!("{base}_{datatype}.edf"),
    ]
    .into_iter()
    .map(|candidate| dir.join(candidate))
    .find(|path| path.is_file())
}

/// `<ses>/<datatype>/<base>_events.tsv` for a behavior file.
pub fn events_path_for(behavior: &Path, datatype: &str) -> Option<PathBuf> {
    let name = behavior.file_name()?.to_string_lossy();
    let base = name.strip_suffix("_beh.tsv")?;
    Some(
        behavior
            .parent()?
            .parent()?
            .join(datatype)
            .join(format!("{base}_events.tsv")),
    )
}
