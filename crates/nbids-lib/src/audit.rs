//! Read-only consistency reports over raw and BIDS trees.

use crate::config::ExperimentConfig;
use crate::entities::{clonesa_behavior_fields, parse_subject_folder};
use crate::io::table::Table;
use crate::io::walk_files;
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

/// Extensions counted as recordings by the validator.
pub const DATA_EXTENSIONS: &[&str] = &["edf", "bdf", "vhdr", "fif", "set"];

/// Sidecar fields BIDS recommends for EEG/MEG recordings.
pub const RECOMMENDED_FIELDS: &[&str] = &["SamplingFrequency", "EEGReference", "PowerLineFrequency"];

/// Behavior files shorter than this are flagged.
pub const MIN_BEHAVIOR_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizeStats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub median: f64,
}

impl SizeStats {
    pub fn from_sizes(sizes: &[u64]) -> Option<Self> {
        if sizes.is_empty() {
            return None;
        }
        let mut sorted = sizes.to_vec();
        sorted.sort_unstable();
        let n = sorted.len();
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
        } else {
            sorted[n / 2] as f64
        };
        Some(Self {
            min: sorted[0],
            max: sorted[n - 1],
            mean: sorted.iter().sum::<u64>() as f64 / n as f64,
            median,
        })
    }
}

/// subject folder -> session folder -> condition -> runs found
pub type RunInventory = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<u32>>>>;

#[derive(Debug, Clone, Serialize)]
pub struct BehaviorAudit {
    pub total_files: usize,
    pub expected_files: usize,
    pub inventory: RunInventory,
    pub issues: Vec<Issue>,
    pub integrity: Vec<Issue>,
    pub sizes: Option<SizeStats>,
}

impl BehaviorAudit {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.integrity.is_empty()
    }
}

/// Audit `sub_NN/<session>/sub_NN_<COND>_<run>_….csv` behavior exports
/// against the expected sessions, conditions and runs `1..=expected_runs`.
/// With no configured sessions, the sessions seen anywhere are expected
/// everywhere.
pub fn audit_behavior(root: &Path, experiment: &ExperimentConfig) -> Result<BehaviorAudit> {
    let files: Vec<_> = walk_files(root, &[])?
        .into_iter()
        .filter(|p| {
            let name = p.to_string_lossy();
            name.trim_end_matches('*').to_ascii_lowercase().ends_with(".csv")
        })
        .collect();

    let mut inventory = RunInventory::new();
    let mut issues = Vec::new();
    for path in &files {
        let rel = path.strip_prefix(root).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let Some(subject_idx) = parts.iter().position(|p| p.starts_with("sub_")) else {
            issues.push(Issue::error(format!("{}: no sub_ folder in path", rel.display())));
            continue;
        };
        let subject = &parts[subject_idx];
        let Some(session) = parts.get(subject_idx + 1).filter(|_| subject_idx + 2 < parts.len())
        else {
            issues.push(Issue::error(format!("{}: no session folder", rel.display())));
            continue;
        };
        let file_name = &parts[parts.len() - 1];
        let Some((sub_num, condition, run)) = clonesa_behavior_fields(file_name) else {
            issues.push(Issue::warning(format!("{}: unparsable file name", rel.display())));
            continue;
        };
        if format!("sub_{sub_num}") != *subject {
            issues.push(Issue::error(format!(
                "{}: subject mismatch ({subject} vs sub_{sub_num})",
                rel.display()
            )));
        }
        let run: u32 = run.parse().unwrap_or(0);
        inventory
            .entry(subject.clone())
            .or_default()
            .entry(session.clone())
            .or_default()
            .entry(condition)
            .or_default()
            .push(run);
    }

    let sessions: Vec<String> = if experiment.sessions.is_empty() {
        inventory
            .values()
            .flat_map(|s| s.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    } else {
        experiment.sessions.clone()
    };
    let expected_runs: BTreeSet<u32> = (1..=experiment.expected_runs_per_session).collect();

    for (subject, by_session) in &mut inventory {
        for session in &sessions {
            let Some(by_condition) = by_session.get_mut(session) else {
                issues.push(Issue::error(format!("{subject}: session {session} missing")));
                continue;
            };
            for condition in &experiment.conditions {
                let Some(runs) = by_condition.get_mut(condition) else {
                    issues.push(Issue::error(format!(
                        "{subject}/{session}: condition {condition} missing"
                    )));
                    continue;
                };
                runs.sort_unstable();
                let found: BTreeSet<u32> = runs.iter().copied().collect();
                let missing: Vec<u32> = expected_runs.difference(&found).copied().collect();
                let extra: Vec<u32> = found.difference(&expected_runs).copied().collect();
                let duplicates: BTreeSet<u32> =
                    runs.windows(2).filter(|w| w[0] == w[1]).map(|w| w[0]).collect();
                let context = format!("{subject}/{session}/{condition}");
                if !missing.is_empty() {
                    issues.push(Issue::warning(format!("{context}: missing runs {missing:?}")));
                }
                if !extra.is_empty() {
                    issues.push(Issue::warning(format!("{context}: extra runs {extra:?}")));
                }
                if !duplicates.is_empty() {
                    issues.push(Issue::error(format!("{context}: duplicate runs {duplicates:?}")));
                }
            }
        }
    }

    let mut integrity = Vec::new();
    let mut sizes = Vec::new();
    for path in &files {
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        match Table::read_with_delimiter(path, b',') {
            Ok(table) => {
                if let Ok(meta) = fs::metadata(path) {
                    sizes.push(meta.len());
                }
                if table.is_empty() {
                    integrity.push(Issue::warning(format!("{name}: empty file")));
                } else if table.len() < MIN_BEHAVIOR_ROWS {
                    integrity.push(Issue::warning(format!("{name}: only {} rows", table.len())));
                }
            }
            Err(err) => integrity.push(Issue::error(format!("{name}: unreadable ({err:#})"))),
        }
    }

    let expected_files = inventory.len()
        * sessions.len()
        * experiment.conditions.len()
        * experiment.expected_runs_per_session as usize;
    Ok(BehaviorAudit {
        total_files: files.len(),
        expected_files,
        inventory,
        issues,
        integrity,
        sizes: SizeStats::from_sizes(&sizes),
    })
}

impl fmt::Display for BehaviorAudit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (subject, by_session) in &self.inventory {
            writeln!(f, "{subject}")?;
            for (session, by_condition) in by_session {
                writeln!(f, "  {session}")?;
                for (condition, runs) in by_condition {
                    writeln!(f, "    {condition:6} {} files, runs {runs:?}", runs.len())?;
                }
            }
        }
        writeln!(f, "Subjects: {}", self.inventory.len())?;
        writeln!(
            f,
            "Files: {} (expected {}, difference {})",
            self.total_files,
            self.expected_files,
            self.total_files as i64 - self.expected_files as i64
        )?;
        if let Some(s) = &self.sizes {
            writeln!(
                f,
                "Sizes: min {} B, max {} B, mean {:.0} B, median {:.0} B",
                s.min, s.max, s.mean, s.median
            )?;
        }
        for issue in self.integrity.iter().chain(&self.issues) {
            writeln!(f, "{issue}")?;
        }
        if self.is_clean() {
            writeln!(f, "No problems found")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub subjects: usize,
    pub participants: Option<usize>,
    pub tasks: BTreeMap<String, usize>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Subjects: {}", self.subjects)?;
        if let Some(n) = self.participants {
            writeln!(f, "participants.tsv: {n} rows")?;
        }
        for (task, count) in &self.tasks {
            writeln!(f, "task-{task}: {count} files")?;
        }
        for (i, err) in self.errors.iter().enumerate() {
            writeln!(f, "error {}: {err}", i + 1)?;
        }
        for (i, warning) in self.warnings.iter().enumerate() {
            writeln!(f, "warning {}: {warning}", i + 1)?;
        }
        if self.is_valid() {
            writeln!(f, "No critical errors")?;
        }
        Ok(())
    }
}

fn task_of(file_name: &str) -> Option<&str> {
    file_name
        .split('.')
        .next()?
        .split('_')
        .find_map(|part| part.strip_prefix("task-"))
}

/// Structural checks of a BIDS tree: required root files and fields are
/// errors; missing sidecars, recommended fields and README are warnings.
pub fn validate_bids(bids_dir: &Path) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    let description = bids_dir.join("dataset_description.json");
    match fs::read_to_string(&description) {
        Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => {
                for field in ["Name", "BIDSVersion"] {
                    if json.get(field).is_none() {
                        report
                            .errors
                            .push(format!("dataset_description.json lacks required field {field}"));
                    }
                }
            }
            Err(err) => report
                .errors
                .push(format!("dataset_description.json is not valid JSON: {err}")),
        },
        Err(_) => report.errors.push("dataset_description.json missing".into()),
    }

    let participants = bids_dir.join("participants.tsv");
    if participants.is_file() {
        report.participants = Table::read(&participants).ok().map(|t| t.len());
    } else {
        report.errors.push("participants.tsv missing".into());
    }

    let mut subjects = BTreeSet::new();
    let mut missing_fields = BTreeSet::new();
    for path in walk_files(bids_dir, &["derivatives", "sourcedata"])? {
        let rel = path.strip_prefix(bids_dir).unwrap_or(&path);
        let Some(subject) = rel
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .filter(|c| c.starts_with("sub-"))
        else {
            continue;
        };
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if DATA_EXTENSIONS.contains(&ext.as_str()) {
            subjects.insert(subject);
            if let Some(task) = task_of(&name) {
                *report.tasks.entry(task.to_string()).or_default() += 1;
            }
            if !path.with_extension("json").is_file() {
                report
                    .warnings
                    .push(format!("{} has no .json sidecar", rel.display()));
            }
        } else if name.ends_with("_eeg.json") || name.ends_with("_meg.json") {
            let fields = fs::read_to_string(&path)
                .ok()
                .and_then(|t| serde_json::from_str::<serde_json::Value>(&t).ok());
            for field in RECOMMENDED_FIELDS {
                if fields.as_ref().and_then(|j| j.get(*field)).is_none() {
                    missing_fields.insert(*field);
                }
            }
        }
    }
    report.subjects = subjects.len();
    if !missing_fields.is_empty() {
        let list: Vec<&str> = missing_fields.into_iter().collect();
        report
            .warnings
            .push(format!("recommended sidecar fields missing: {}", list.join(", ")));
    }

    let has_readme = ["README", "README.md", "README.txt", "README.rst"]
        .iter()
        .any(|n| bids_dir.join(n).is_file());
    if !has_readme {
        report.warnings.push("README missing (recommended)".into());
    }
    Ok(report)
}

/// Name of the per-participant folder holding visit folders.
pub const EEG_FOLDER: &str = "2_EEG";

#[derive(Debug, Clone, Serialize)]
pub struct SubjectSessions {
    pub folder: String,
    pub sessions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub groups: BTreeMap<String, Vec<SubjectSessions>>,
}

impl SessionSummary {
    pub fn mean_sessions(&self, group: &str) -> Option<f64> {
        let subjects = self.groups.get(group)?;
        if subjects.is_empty() {
            return None;
        }
        let total: usize = subjects.iter().map(|s| s.sessions.len()).sum();
        Some(total as f64 / subjects.len() as f64)
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (group, subjects) in &self.groups {
            writeln!(f, "{group} ({} participants)", subjects.len())?;
            for s in subjects {
                writeln!(f, "  {}: {} sessions {:?}", s.folder, s.sessions.len(), s.sessions)?;
            }
            if let Some(mean) = self.mean_sessions(group) {
                writeln!(f, "  mean: {mean:.1} sessions/participant")?;
            }
        }
        Ok(())
    }
}

/// Count `V*` visit folders per participant, grouped by PATIENT/HEALTHY.
/// Excluded and stand-by participants are left out.
pub fn session_summary(raw_dir: &Path) -> Result<SessionSummary> {
    let mut summary = SessionSummary::default();
    let mut entries: Vec<_> = fs::read_dir(raw_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let folder = entry.file_name().to_string_lossy().into_owned();
        let Some(info) = parse_subject_folder(&folder) else {
            continue;
        };
        if info.excluded {
            continue;
        }
        let eeg_dir = entry.path().join(EEG_FOLDER);
        if !eeg_dir.is_dir() {
            continue;
        }
        let mut sessions: Vec<String> = fs::read_dir(&eeg_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with('V'))
            .collect();
        sessions.sort();
        summary
            .groups
            .entry(info.group)
            .or_default()
            .push(SubjectSessions { folder, sessions });
    }
    Ok(summary)
}

/// Label for files without an extension.
pub const NO_EXTENSION: &str = "[no_extension]";

/// File counts per lower-case extension over included participants.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileTypeStats {
    pub participants: usize,
    /// Most frequent first; ties by extension.
    pub extensions: Vec<(String, usize)>,
}

impl FileTypeStats {
    pub fn total(&self) -> usize {
        self.extensions.iter().map(|(_, n)| n).sum()
    }

    pub fn count(&self, extension: &str) -> usize {
        self.extensions
            .iter()
            .find(|(ext, _)| ext == extension)
            .map_or(0, |(_, n)| *n)
    }
}

impl fmt::Display for FileTypeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} files in {} participant folders", self.total(), self.participants)?;
        for (ext, count) in &self.extensions {
            writeln!(f, "  {ext:<16} {count}")?;
        }
        Ok(())
    }
}

/// Count every file under the included `<NNN>-<NNNN>-<XX>_<GROUP>` folders
/// of `raw_dir` by extension.
pub fn file_type_stats(raw_dir: &Path) -> Result<FileTypeStats> {
    let mut stats = FileTypeStats::default();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut entries: Vec<_> = fs::read_dir(raw_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let folder = entry.file_name().to_string_lossy().into_owned();
        match parse_subject_folder(&folder) {
            Some(info) if !info.excluded => {}
            _ => continue,
        }
        stats.participants += 1;
        for file in walk_files(&entry.path(), &[])? {
            let ext = file
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_else(|| NO_EXTENSION.to_string());
            *counts.entry(ext).or_default() += 1;
        }
    }
    stats.extensions = counts.into_iter().collect();
    stats.extensions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn behavior_csv(rows: usize) -> String {
        let mut text = String::from("trial,rt\n");
        for i in 0..rows {
            text.push_str(&format!("{i},0.5\n"));
        }
        text
    }

    #[test]
    fn behavior_audit_reports_gaps_and_duplicates() {
        let root = tempdir().unwrap();
        let ses = root.path().join("sub_01/ses_01");
        fs::create_dir_all(&ses).unwrap();
        for (name, rows) in [
            ("sub_01_SHAM_1_probe.csv", 20),
            ("sub_01_SHAM_2_probe.csv", 20),
            ("sub_01_SHAM _3_probe.csv", 20),
            ("sub_01_SHAM_3_probe_retry.csv", 20),
            ("sub_01_tACS_1_probe.csv", 3),
            ("sub_01_tACS_5_probe.csv", 20),
            ("sub_02_tRNS_1_probe.csv", 20),
            ("notes.csv", 20),
        ] {
            fs::write(ses.join(name), behavior_csv(rows)).unwrap();
        }
        let experiment = ExperimentConfig {
            sessions: vec!["ses_01".into(), "ses_02".into()],
            ..Default::default()
        };
        let audit = audit_behavior(root.path(), &experiment).unwrap();
        let messages: Vec<&str> = audit.issues.iter().map(|i| i.message.as_str()).collect();
        assert!(messages.contains(&"sub_01/ses_01/SHAM: missing runs [4]"));
        assert!(messages.contains(&"sub_01/ses_01/SHAM: duplicate runs {3}"));
        assert!(messages.contains(&"sub_01/ses_01/tACS: missing runs [2, 3, 4]"));
        assert!(messages.contains(&"sub_01/ses_01/tACS: extra runs [5]"));
        assert!(messages.contains(&"sub_01: session ses_02 missing"));
        assert!(messages.iter().any(|m| m.contains("subject mismatch")));
        assert!(messages.iter().any(|m| m.contains("notes.csv: unparsable")));
        assert_eq!(audit.total_files, 8);
        assert_eq!(audit.expected_files, 24);
        assert_eq!(audit.integrity.len(), 1);
        assert!(audit.integrity[0].message.contains("only 3 rows"));
        let sizes = audit.sizes.unwrap();
        assert!(sizes.min < sizes.max);
    }

    #[test]
    fn size_stats_use_the_middle_values() {
        let stats = SizeStats::from_sizes(&[4, 1, 3, 2]).unwrap();
        assert_eq!((stats.min, stats.max), (1, 4));
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.mean, 2.5);
        assert!(SizeStats::from_sizes(&[]).is_none());
    }

    #[test]
    fn validation_separates_errors_from_warnings() {
        let bids = tempdir().unwrap();
        let report = validate_bids(bids.path()).unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 2);

        fs::write(bids.path().join("dataset_description.json"), r#"{"Name": "x"}"#).unwrap();
        fs::write(bids.path().join("participants.tsv"), "participant_id\nsub-01\n").unwrap();
        let eeg = bids.path().join("sub-01/ses-01/eeg");
        fs::create_dir_all(&eeg).unwrap();
        fs::write(eeg.join("sub-01_ses-01_task-rest_eeg.edf"), b"").unwrap();
        fs::write(eeg.join("sub-01_ses-01_task-flanker_eeg.edf"), b"").unwrap();
        fs::write(
            eeg.join("sub-01_ses-01_task-flanker_eeg.json"),
            r#"{"SamplingFrequency": 500}"#,
        )
        .unwrap();
        let report = validate_bids(bids.path()).unwrap();
        assert_eq!(report.errors, vec!["dataset_description.json lacks required field BIDSVersion"]);
        assert_eq!(report.subjects, 1);
        assert_eq!(report.participants, Some(1));
        assert_eq!(report.tasks.get("rest"), Some(&1));
        assert_eq!(report.tasks.get("flanker"), Some(&1));
        assert!(report.warnings.iter().any(|w| w.contains("task-rest_eeg.edf has no .json")));
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("EEGReference, PowerLineFrequency")));
        assert!(report.warnings.iter().any(|w| w.starts_with("README")));
    }

    #[test]
    fn sessions_are_counted_per_group() {
        let raw = tempdir().unwrap();
        for dir in [
            "001-0001-AB_PATIENT/2_EEG/V1_BASELINE",
            "001-0001-AB_PATIENT/2_EEG/V2_STIM",
            "001-0001-AB_PATIENT/2_EEG/notes",
            "002-0002-CD_HEALTHY/2_EEG/V1_BASELINE",
            "003-0003-EF_PATIENT_excluded/2_EEG/V1_BASELINE",
        ] {
            fs::create_dir_all(raw.path().join(dir)).unwrap();
        }
        let summary = session_summary(raw.path()).unwrap();
        assert_eq!(summary.groups["PATIENT"].len(), 1);
        assert_eq!(summary.groups["PATIENT"][0].sessions, vec!["V1_BASELINE", "V2_STIM"]);
        assert_eq!(summary.mean_sessions("HEALTHY"), Some(1.0));
    }

    #[test]
    fn file_types_are_counted_over_included_participants() {
        let raw = tempdir().unwrap();
        let visit = raw.path().join("001-0042-AB_PATIENT/2_EEG/V1_BASELINE");
        fs::create_dir_all(&visit).unwrap();
        for name in ["a.edf", "b.EDF", "a.easy", "notes", "c.edf"] {
            fs::write(visit.join(name), "x").unwrap();
        }
        let excluded = raw.path().join("002-0007-CD_HEALTHY_excluded");
        fs::create_dir_all(&excluded).unwrap();
        fs::write(excluded.join("d.edf"), "x").unwrap();
        fs::write(raw.path().join("loose.txt"), "x").unwrap();

        let stats = file_type_stats(raw.path()).unwrap();
        assert_eq!(stats.participants, 1);
        assert_eq!(stats.total(), 5);
        assert_eq!(stats.extensions[0], (".edf".to_string(), 3));
        assert_eq!(stats.count(".easy"), 1);
        assert_eq!(stats.count(NO_EXTENSION), 1);
        assert!(stats.to_string().contains(".edf"));
    }
}
