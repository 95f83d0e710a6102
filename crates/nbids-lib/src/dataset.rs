//! Root-level dataset files: `participants.tsv` and `dataset_description.json`.

use crate::config::DatasetConfig;
use crate::entities::parse_subject_folder;
use crate::io::table::Table;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub group: String,
    pub initials: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Skipped,
}

fn sorted_dirs(root: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(root)
        .with_context(|| format!("listing {}", root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

/// Participants from raw `<NNN>-<NNNN>-<INITIALS>_<GROUP>` folders directly
/// under `raw_dir`. Excluded and stand-by folders are left out; the first
/// folder of a subject wins.
pub fn collect_participants(raw_dir: &Path) -> Result<Vec<Participant>> {
    let mut by_id: BTreeMap<String, Participant> = BTreeMap::new();
    for name in sorted_dirs(raw_dir)? {
        let Some(folder) = parse_subject_folder(&name) else {
            continue;
        };
        if folder.excluded {
            info!("excluded participant folder: {name}");
            continue;
        }
        let participant_id = format!("sub-{}", folder.subject);
        by_id.entry(participant_id.clone()).or_insert(Participant {
            participant_id,
            group: folder.group.to_lowercase(),
            initials: folder.initials,
        });
    }
    Ok(by_id.into_values().collect())
}

/// Participants of an existing BIDS tree (`sub-*` folders), without group.
pub fn participants_from_bids(bids_dir: &Path) -> Result<Vec<Participant>> {
    Ok(sorted_dirs(bids_dir)?
        .into_iter()
        .filter(|name| name.starts_with("sub-"))
        .map(|participant_id| Participant {
            participant_id,
            group: "n/a".into(),
            initials: "n/a".into(),
        })
        .collect())
}

pub fn write_participants_tsv(
    bids_dir: &Path,
    participants: &[Participant],
    overwrite: bool,
) -> Result<WriteOutcome> {
    let path = bids_dir.join("participants.tsv");
    if path.exists() && !overwrite {
        debug!("keeping existing {}", path.display());
        return Ok(WriteOutcome::Skipped);
    }
    let mut table = Table::new(vec!["participant_id".into(), "group".into(), "initials".into()]);
    for p in participants {
        table
            .rows
            .push(vec![p.participant_id.clone(), p.group.clone(), p.initials.clone()]);
    }
    fs::create_dir_all(bids_dir)?;
    table.write_tsv(&path)?;
    info!("participants.tsv written: {} participants", participants.len());
    Ok(WriteOutcome::Written)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatasetDescription {
    pub name: String,
    #[serde(rename = "BIDSVersion")]
    pub bids_version: String,
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&DatasetConfig> for DatasetDescription {
    fn from(cfg: &DatasetConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            bids_version: cfg.bids_version.clone(),
            authors: cfg.authors.clone(),
            description: cfg.description.clone(),
        }
    }
}

pub fn write_dataset_description(
    bids_dir: &Path,
    cfg: &DatasetConfig,
    overwrite: bool,
) -> Result<WriteOutcome> {
    let path = bids_dir.join("dataset_description.json");
    if path.exists() && !overwrite {
        debug!("keeping existing {}", path.display());
        return Ok(WriteOutcome::Skipped);
    }
    fs::create_dir_all(bids_dir)?;
    let json = serde_json::to_string_pretty(&DatasetDescription::from(cfg))?;
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(WriteOutcome::Written)
}
