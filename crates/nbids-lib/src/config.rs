use crate::entities::Study;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location looked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "_config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported configuration format for {0} (expected .yaml, .yml or .toml)")]
    UnknownFormat(PathBuf),
}

/// Project-level settings: dataset roots plus experiment and alignment constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub raw_dir: PathBuf,
    pub bids_dir: PathBuf,
    #[serde(default)]
    pub derivatives_dir: Option<PathBuf>,
    #[serde(default)]
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Task label for studies whose file names do not name the task
    /// (explorePlus, clonesa). Unset keeps each rule's built-in label.
    pub task: Option<String>,
    /// Which filename rule set applies to the raw tree.
    pub study: Study,
    pub conditions: Vec<String>,
    pub sessions: Vec<String>,
    pub expected_runs_per_session: u32,
    /// Folder of per-participant MRI exports, relative to `raw_dir`.
    pub mri_dir: PathBuf,
    /// Session label given to inserted MRI files.
    pub mri_session: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            task: None,
            study: Study::All,
            conditions: vec!["SHAM".into(), "tACS".into(), "tRNS".into()],
            sessions: Vec::new(),
            expected_runs_per_session: 4,
            mri_dir: PathBuf::from("IRM"),
            mri_session: "01".into(),
        }
    }
}

/// Tunables of the trigger/behavior alignment. All times in seconds unless
/// stated otherwise; the defaults are the ones used for the MEG bandit study.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Sampling rate used for trigger tables that carry sample indices.
    pub sfreq: f64,
    /// Answers further than this from every question are dropped.
    pub max_time_diff_s: f64,
    /// Maximum accepted answers inside one `time_window_s` span.
    pub max_events: usize,
    pub time_window_s: f64,
    /// Allowed mismatch between recording and behavior inter-event intervals.
    pub timing_tolerance_s: f64,
    /// Drop the first pulse of every channel except `start`.
    pub drop_calibration_pulse: bool,
    pub trial_min_count: usize,
    pub question_min_count: usize,
    /// Minimum step length (samples) when reading stim channels.
    pub shortest_event: usize,
    /// Datatype folder that holds recordings and receives events tables.
    pub trigger_datatype: String,
    /// Event name -> stim channel labels.
    pub channels: BTreeMap<String, Vec<String>>,
    /// Behavior columns copied into the events table; empty keeps all.
    pub metadata_columns: Vec<String>,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        let channels = [
            ("start", vec!["STI006"]),
            ("cue", vec!["STI001"]),
            ("response", vec!["STI002"]),
            ("feedback", vec!["STI003"]),
            ("questions", vec!["STI005"]),
            ("answers", vec!["STI009", "STI010", "STI012", "STI013"]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into_iter().map(String::from).collect()))
        .collect();
        Self {
            sfreq: 1000.0,
            max_time_diff_s: 6.0,
            max_events: 4,
            time_window_s: 16.0,
            timing_tolerance_s: 0.01,
            drop_calibration_pulse: true,
            trial_min_count: 80,
            question_min_count: 15,
            shortest_event: 1,
            trigger_datatype: "meg".into(),
            channels,
            metadata_columns: Vec::new(),
        }
    }
}

/// Content of `dataset_description.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub name: String,
    pub bids_version: String,
    pub authors: Vec<String>,
    pub description: Option<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            name: "Unnamed dataset".into(),
            bids_version: "1.9.0".into(),
            authors: vec!["Unknown".into()],
            description: None,
        }
    }
}

impl ProjectConfig {
    /// Load a YAML or TOML configuration, picked by file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let config = match ext.as_deref() {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
                .with_context(|| format!("parsing config {}", path.display()))?,
            Some("toml") => toml::from_str(&contents)
                .with_context(|| format!("parsing config {}", path.display()))?,
            _ => return Err(ConfigError::UnknownFormat(path.to_path_buf()).into()),
        };
        Ok(config)
    }

    pub fn mri_dir(&self) -> PathBuf {
        self.raw_dir.join(&self.experiment.mri_dir)
    }

    pub fn derivatives_dir(&self) -> PathBuf {
        self.derivatives_dir
            .clone()
            .unwrap_or_else(|| self.bids_dir.join("derivatives"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_yaml_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("_config.yaml");
        fs::write(
            &path,
            "raw_dir: /data/raw\nbids_dir: /data/bids\nexperiment:\n  task: explore\n  study: explore-plus\nalignment:\n  max_events: 3\n",
        )
        .unwrap();
        let cfg = ProjectConfig::load(&path).unwrap();
        assert_eq!(cfg.raw_dir, PathBuf::from("/data/raw"));
        assert_eq!(cfg.experiment.task.as_deref(), Some("explore"));
        assert_eq!(cfg.experiment.study, Study::ExplorePlus);
        assert_eq!(cfg.alignment.max_events, 3);
        assert_eq!(cfg.alignment.time_window_s, 16.0);
        assert_eq!(cfg.alignment.channels["answers"].len(), 4);
        assert_eq!(cfg.derivatives_dir(), PathBuf::from("/data/bids/derivatives"));
    }

    #[test]
    fn loads_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("project.toml");
        fs::write(
            &path,
            "raw_dir = \"raw\"\nbids_dir = \"bids\"\n[experiment]\nsessions = [\"V1\", \"V2\"]\n",
        )
        .unwrap();
        let cfg = ProjectConfig::load(&path).unwrap();
        assert_eq!(cfg.experiment.sessions, vec!["V1", "V2"]);
        assert_eq!(cfg.experiment.expected_runs_per_session, 4);
        assert_eq!(cfg.experiment.task, None);
        assert_eq!(cfg.mri_dir(), PathBuf::from("raw/IRM"));
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(&path, "raw_dir=x").unwrap();
        let err = ProjectConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported configuration format"));
    }
}
