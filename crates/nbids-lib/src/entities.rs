//! Mapping of raw acquisition paths to BIDS entities.
//!
//! Every sub-study named its files differently, so parsing is an ordered list
//! of rules. Each rule pairs a cheap predicate with an extractor; the first
//! rule whose predicate accepts a path decides the outcome, even when its
//! extractor then rejects the file. Unrecognized paths are reported, never
//! raised.

use regex::Regex;
use crate::config::ExperimentConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

macro_rules! regex {
    ($re:literal) => {{
        static RE: ::std::sync::OnceLock<::regex::Regex> = ::std::sync::OnceLock::new();
        RE.get_or_init(|| ::regex::Regex::new($re).expect("static regex"))
    }};
}

/// Datatype folders understood by the generic rule.
pub const DATATYPES: &[&str] = &["eeg", "meg", "ieeg", "beh", "nirs", "anat", "func"];

/// Rule sets shipped for the lab's sub-studies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Study {
    Hemianotacs,
    ExplorePlus,
    Clonesa,
    Generic,
    #[default]
    All,
}

impl std::str::FromStr for Study {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hemianotacs" => Ok(Study::Hemianotacs),
            "explore-plus" | "exploreplus" => Ok(Study::ExplorePlus),
            "clonesa" => Ok(Study::Clonesa),
            "generic" => Ok(Study::Generic),
            "all" => Ok(Study::All),
            other => Err(format!("unknown study '{other}'")),
        }
    }
}

/// The (subject, session, task, acquisition, run) identifiers of a BIDS file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entities {
    pub subject: String,
    pub session: Option<String>,
    pub task: String,
    pub acquisition: Option<String>,
    pub run: Option<String>,
}

impl Entities {
    pub fn new(subject: &str, session: Option<&str>, task: &str) -> Self {
        Self {
            subject: label(subject),
            session: session.map(label),
            task: label(task),
            acquisition: None,
            run: None,
        }
    }

    pub fn with_acquisition(mut self, acq: Option<&str>) -> Self {
        self.acquisition = acq.map(label);
        self
    }

    pub fn with_run(mut self, run: Option<&str>) -> Self {
        self.run = run.map(label);
        self
    }

    /// `sub-<id>[_ses-<id>]_task-<id>[_acq-<id>][_run-<id>]`
    pub fn basename(&self) -> String {
        let mut name = format!("sub-{}", self.subject);
        if let Some(ses) = &self.session {
            name.push_str(&format!("_ses-{ses}"));
        }
        name.push_str(&format!("_task-{}", self.task));
        if let Some(acq) = &self.acquisition {
            name.push_str(&format!("_acq-{acq}"));
        }
        if let Some(run) = &self.run {
            name.push_str(&format!("_run-{run}"));
        }
        name
    }

    pub fn filename(&self, suffix: &str, extension: &str) -> String {
        let ext = extension.trim_start_matches('.');
        if ext.is_empty() {
            format!("{}_{}", self.basename(), suffix)
        } else {
            format!("{}_{}.{}", self.basename(), suffix, ext)
        }
    }

    /// `<root>/sub-<id>[/ses-<id>]/<datatype>`
    pub fn directory(&self, root: &Path, datatype: &str) -> PathBuf {
        let mut dir = root.join(format!("sub-{}", self.subject));
        if let Some(ses) = &self.session {
            dir = dir.join(format!("ses-{ses}"));
        }
        dir.join(datatype)
    }

    /// Short human context used in reports.
    pub fn context(&self) -> String {
        self.basename().replace('_', "/")
    }
}

/// Strip everything BIDS does not accept in a label.
fn label(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// What an extractor produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub entities: Entities,
    pub datatype: String,
    pub suffix: String,
}

impl Extracted {
    fn new(entities: Entities, datatype: &str) -> Self {
        Self {
            entities,
            datatype: datatype.into(),
            suffix: datatype.into(),
        }
    }
}

/// A recognized file: entities plus where it goes and which rule decided it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedName {
    pub entities: Entities,
    pub datatype: String,
    pub suffix: String,
    pub rule: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Parsed {
    Recognized(ParsedName),
    Unrecognized,
}

impl Parsed {
    pub fn recognized(self) -> Option<ParsedName> {
        match self {
            Parsed::Recognized(name) => Some(name),
            Parsed::Unrecognized => None,
        }
    }
}

/// A raw path split into file name and ancestor folders (nearest first).
#[derive(Debug, Clone)]
pub struct RawName<'a> {
    pub file_name: &'a str,
    pub ancestors: Vec<&'a str>,
}

impl<'a> RawName<'a> {
    pub fn new(path: &'a str) -> Self {
        let mut parts: Vec<&'a str> = path
            .split(|c| c == '/' || c == '\\')
            .filter(|p| !p.is_empty())
            .collect();
        let file_name = parts.pop().unwrap_or("");
        parts.reverse();
        Self {
            file_name,
            ancestors: parts,
        }
    }

    pub fn extension(&self) -> Option<String> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        self.extension().as_deref() == Some(ext)
    }

    pub fn parent(&self) -> Option<&'a str> {
        self.ancestors.first().copied()
    }

    pub fn find_ancestor<T>(&self, f: impl Fn(&str) -> Option<T>) -> Option<T> {
        self.ancestors.iter().find_map(|a| f(*a))
    }
}

/// One (predicate, extractor) pair.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub matches: fn(&RawName) -> bool,
    pub extract: fn(&RawName) -> Option<Extracted>,
    /// The file name carries no task, so a configured task label replaces
    /// the rule's built-in one.
    pub task_from_config: bool,
}

/// Ordered rules; the first matching predicate wins.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    task: Option<String>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules, task: None }
    }

    /// Rules of the configured study, labelled with the configured task.
    pub fn for_experiment(experiment: &ExperimentConfig) -> Self {
        Self::for_study(experiment.study).with_task(experiment.task.as_deref())
    }

    /// Task label used by rules whose file names do not name the task.
    pub fn with_task(mut self, task: Option<&str>) -> Self {
        self.task = task.map(str::to_string);
        self
    }

    /// Rules of one study followed by the generic fallback; `All` chains
    /// every study, most specific first.
    pub fn for_study(study: Study) -> Self {
        let mut rules = match study {
            Study::Hemianotacs => hemianotacs_rules(),
            Study::ExplorePlus => explore_plus_rules(),
            Study::Clonesa => clonesa_rules(),
            Study::Generic => Vec::new(),
            Study::All => {
                let mut all = hemianotacs_rules();
                all.extend(explore_plus_rules());
                all.extend(clonesa_rules());
                all
            }
        };
        rules.extend(generic_rules());
        Self::new(rules)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn first_match(&self, raw: &RawName) -> Option<&Rule> {
        self.rules.iter().find(|rule| (rule.matches)(raw))
    }

    pub fn parse(&self, path: &str) -> Parsed {
        let raw = RawName::new(path);
        let Some(rule) = self.first_match(&raw) else {
            return Parsed::Unrecognized;
        };
        match (rule.extract)(&raw) {
            Some(mut extracted) => {
                if let Some(task) = self.task.as_deref().filter(|_| rule.task_from_config) {
                    extracted.entities.task = task.to_string();
                }
                Parsed::Recognized(ParsedName {
                    entities: extracted.entities,
                    datatype: extracted.datatype,
                    suffix: extracted.suffix,
                    rule: rule.name,
                })
            }
            None => Parsed::Unrecognized,
        }
    }

    pub fn parse_path(&self, path: &Path) -> Parsed {
        self.parse(&path.to_string_lossy())
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::for_study(Study::All)
    }
}

// ---------------------------------------------------------------------------
// hemianotACS: <NNN-NNNN-XX_GROUP>/2_EEG/<V1_...>/<name>.edf

/// Participant folder of the hemianotACS raw tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectFolder {
    pub subject: String,
    pub group: String,
    pub initials: String,
    pub excluded: bool,
}

pub fn parse_subject_folder(name: &str) -> Option<SubjectFolder> {
    let caps = regex!(r"^(\d+)-(\d+)-([A-Z]+)_(PATIENT|HEALTHY)").captures(name)?;
    Some(SubjectFolder {
        subject: caps[2].to_string(),
        group: caps[4].to_string(),
        initials: caps[3].to_string(),
        excluded: name.contains("excluded") || name.contains("STAND_BY"),
    })
}

/// `V1_BASELINE_22-12-2020` -> `01`
pub fn session_from_visit_folder(name: &str) -> Option<String> {
    let caps = regex!(r"^V(\d+)").captures(name)?;
    Some(format!("{:0>2}", &caps[1]))
}

fn hemi_tree(raw: &RawName) -> bool {
    raw.has_extension("edf") && raw.find_ancestor(parse_subject_folder).is_some()
}

fn hemi_extract(raw: &RawName, task: &str, acq: Option<&str>) -> Option<Extracted> {
    let folder = raw.find_ancestor(parse_subject_folder)?;
    if folder.excluded {
        return None;
    }
    let session = session_from_visit_folder(raw.parent()?)?;
    let run = regex!(r"[Ss]tim(\d+)")
        .captures(raw.file_name)
        .map(|c| c[1].to_string());
    let entities = Entities::new(&folder.subject, Some(&session), task)
        .with_acquisition(acq)
        .with_run(run.as_deref());
    Some(Extracted::new(entities, "eeg"))
}

fn hemi_unusable(raw: &RawName) -> bool {
    hemi_tree(raw)
        && (raw.file_name.contains("ABORTED") || raw.file_name.contains("easy_converted"))
}

fn reject(_: &RawName) -> Option<Extracted> {
    None
}

fn hemi_rest(raw: &RawName) -> bool {
    let f = raw.file_name;
    hemi_tree(raw) && (f.contains("Resting-state") || f.to_lowercase().contains("resting"))
}

fn hemi_rest_extract(raw: &RawName) -> Option<Extracted> {
    let f = raw.file_name;
    let acq = if f.contains("_Pre") || f.contains("Pre_") || f.contains("Prestim") {
        Some("pre")
    } else if f.contains("_Post") || f.contains("Post_") || f.contains("Poststim") {
        Some("post")
    } else {
        None
    };
    hemi_extract(raw, "rest", acq)
}

fn hemi_flanker(raw: &RawName) -> bool {
    hemi_tree(raw) && (raw.file_name.contains("Task") || raw.file_name.contains("task"))
}

fn hemi_flanker_extract(raw: &RawName) -> Option<Extracted> {
    let f = raw.file_name;
    let acq = if f.contains("PreStim") || f.contains("Prestim") {
        Some("pre")
    } else if f.contains("PostStim") || f.contains("Poststim") {
        Some("post")
    } else {
        None
    };
    hemi_extract(raw, "flanker", acq)
}

const STIM_TYPES: [&str; 3] = ["SHAM", "tACS", "tRNS"];

fn hemi_stim(raw: &RawName) -> bool {
    hemi_tree(raw) && STIM_TYPES.iter().any(|s| raw.file_name.contains(s))
}

fn hemi_stim_extract(raw: &RawName) -> Option<Extracted> {
    let acq = STIM_TYPES
        .iter()
        .find(|s| raw.file_name.contains(*s))
        .copied();
    hemi_extract(raw, "stim", acq)
}

pub fn hemianotacs_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "hemianotacs-unusable",
            matches: hemi_unusable,
            extract: reject,
            task_from_config: false,
        },
        Rule {
            name: "hemianotacs-rest",
            matches: hemi_rest,
            extract: hemi_rest_extract,
            task_from_config: false,
        },
        Rule {
            name: "hemianotacs-flanker",
            matches: hemi_flanker,
            extract: hemi_flanker_extract,
            task_from_config: false,
        },
        Rule {
            name: "hemianotacs-stim",
            matches: hemi_stim,
            extract: hemi_stim_extract,
            task_from_config: false,
        },
    ]
}

// ---------------------------------------------------------------------------
// explorePlus: RAW/sub-1NN/sess_N/{meg,behavior}/...

/// Raw subjects carry a leading `1`: `sub-108` is BIDS `sub-08`.
fn explore_subject(name: &str) -> Option<String> {
    regex!(r"^sub-1(\d+)$")
        .captures(name)
        .map(|c| c[1].to_string())
}

fn explore_session(name: &str) -> Option<String> {
    regex!(r"^sess_(\w+)$")
        .captures(name)
        .map(|c| c[1].to_string())
}

fn explore_tree(raw: &RawName) -> bool {
    raw.find_ancestor(explore_subject).is_some()
}

fn explore_extract(raw: &RawName, run_pattern: &Regex, datatype: &str) -> Option<Extracted> {
    let subject = raw.find_ancestor(explore_subject)?;
    let session = raw.find_ancestor(explore_session);
    let run = run_pattern.captures(raw.file_name)?[1].to_string();
    let entities = Entities::new(&subject, session.as_deref(), "explore").with_run(Some(&run));
    Some(Extracted::new(entities, datatype))
}

fn explore_meg(raw: &RawName) -> bool {
    explore_tree(raw) && raw.has_extension("fif") && raw.file_name.contains("run")
}

fn explore_meg_extract(raw: &RawName) -> Option<Extracted> {
    explore_extract(raw, regex!(r"run-?(\d+)"), "meg")
}

fn explore_behavior(raw: &RawName) -> bool {
    explore_tree(raw) && raw.has_extension("csv") && raw.file_name.contains("data")
}

fn explore_behavior_extract(raw: &RawName) -> Option<Extracted> {
    explore_extract(raw, regex!(r"block(\d+)"), "beh")
}

pub fn explore_plus_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "explore-meg",
            matches: explore_meg,
            extract: explore_meg_extract,
            task_from_config: true,
        },
        Rule {
            name: "explore-behavior",
            matches: explore_behavior,
            extract: explore_behavior_extract,
            task_from_config: true,
        },
    ]
}

// ---------------------------------------------------------------------------
// clonesa-tACS: bhv/sub_NN/ses_MM/sub_NN_COND_RUN_....csv and eeg sub_NN/ses_MM/*.fif

fn clonesa_subject(name: &str) -> Option<String> {
    regex!(r"^sub_(\d+)$").captures(name).map(|c| c[1].to_string())
}

fn clonesa_session(name: &str) -> Option<String> {
    regex!(r"^ses_(\w+)$").captures(name).map(|c| c[1].to_string())
}

/// Behavior exports sometimes end with a stray `*`.
fn clonesa_clean_name<'a>(raw: &RawName<'a>) -> &'a str {
    raw.file_name.trim_end_matches('*')
}

fn clonesa_behavior(raw: &RawName) -> bool {
    let name = clonesa_clean_name(raw);
    name.starts_with("sub_") && name.to_ascii_lowercase().ends_with(".csv")
}

/// Condition and run parsed from a clonesa behavior export name.
pub fn clonesa_behavior_fields(file_name: &str) -> Option<(String, String, String)> {
    let caps = regex!(r"^sub_(\d+)_(SHAM|tACS|tRNS)\s*_?\s*(\d+)_.*\.csv$")
        .captures(file_name.trim_end_matches('*'))?;
    Some((caps[1].to_string(), caps[2].to_string(), caps[3].to_string()))
}

fn clonesa_behavior_extract(raw: &RawName) -> Option<Extracted> {
    let (subject, condition, run) = clonesa_behavior_fields(raw.file_name)?;
    let session = raw.find_ancestor(clonesa_session);
    let entities = Entities::new(&subject, session.as_deref(), "tacs")
        .with_acquisition(Some(&condition))
        .with_run(Some(&run));
    Some(Extracted::new(entities, "beh"))
}

fn clonesa_eeg(raw: &RawName) -> bool {
    raw.has_extension("fif")
        && raw.parent().and_then(clonesa_session).is_some()
        && raw.ancestors.get(1).copied().and_then(clonesa_subject).is_some()
}

fn clonesa_eeg_extract(raw: &RawName) -> Option<Extracted> {
    let session = raw.parent().and_then(clonesa_session)?;
    let subject = raw.ancestors.get(1).copied().and_then(clonesa_subject)?;
    let entities = Entities::new(&subject, Some(&session), "tacs");
    Some(Extracted::new(entities, "eeg"))
}

pub fn clonesa_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "clonesa-behavior",
            matches: clonesa_behavior,
            extract: clonesa_behavior_extract,
            task_from_config: true,
        },
        Rule {
            name: "clonesa-eeg",
            matches: clonesa_eeg,
            extract: clonesa_eeg_extract,
            task_from_config: true,
        },
    ]
}

// ---------------------------------------------------------------------------
// Generic: names that already carry key-value entities.

fn bids_like(raw: &RawName) -> bool {
    raw.file_name.starts_with("sub-") && raw.file_name.contains("_task-")
}

/// Parse `sub-01_ses-02_task-rest_run-1_eeg.edf` style names. The datatype is
/// the suffix when it names one, otherwise the parent folder.
pub fn parse_bids_name(raw: &RawName) -> Option<Extracted> {
    let stem = raw.file_name.split('.').next()?;
    let (mut sub, mut ses, mut task, mut acq, mut run, mut suffix) =
        (None, None, None, None, None, None);
    for segment in stem.split('_') {
        match segment.split_once('-') {
            Some(("sub", v)) => sub = Some(v),
            Some(("ses", v)) => ses = Some(v),
            Some(("task", v)) => task = Some(v),
            Some(("acq", v)) => acq = Some(v),
            Some(("run", v)) => run = Some(v),
            Some(_) => {}
            None => suffix = Some(segment),
        }
    }
    let suffix = suffix?;
    let datatype = if DATATYPES.contains(&suffix) {
        suffix.to_string()
    } else {
        raw.parent().filter(|p| DATATYPES.contains(p))?.to_string()
    };
    let entities = Entities::new(sub?, ses, task?)
        .with_acquisition(acq)
        .with_run(run);
    Some(Extracted {
        entities,
        datatype,
        suffix: suffix.to_string(),
    })
}

pub fn generic_rules() -> Vec<Rule> {
    vec![Rule {
        name: "bids-entities",
        matches: bids_like,
        extract: parse_bids_name,
        task_from_config: false,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEMI: &str = "EEG/001-0001-CC_PATIENT/2_EEG/V1_BASELINE_22-12-2020";

    fn parse(path: &str) -> ParsedName {
        RuleSet::default()
            .parse(path)
            .recognized()
            .unwrap_or_else(|| panic!("{path} should be recognized"))
    }

    #[test]
    fn hemianotacs_rest_pre() {
        let p = parse(&format!("{HEMI}/Resting-state_Pre_Stim1.edf"));
        assert_eq!(p.rule, "hemianotacs-rest");
        assert_eq!(p.entities.subject, "0001");
        assert_eq!(p.entities.session.as_deref(), Some("01"));
        assert_eq!(p.entities.task, "rest");
        assert_eq!(p.entities.acquisition.as_deref(), Some("pre"));
        assert_eq!(p.entities.run.as_deref(), Some("1"));
        assert_eq!(p.datatype, "eeg");
    }

    #[test]
    fn hemianotacs_task_rule_precedes_stim_rule() {
        let p = parse(&format!("{HEMI}/Task_PreStim_tACS_Stim2.edf"));
        assert_eq!(p.rule, "hemianotacs-flanker");
        assert_eq!(p.entities.task, "flanker");
        assert_eq!(p.entities.acquisition.as_deref(), Some("pre"));
        assert_eq!(p.entities.run.as_deref(), Some("2"));
    }

    #[test]
    fn hemianotacs_stim_type_becomes_acquisition() {
        let p = parse(&format!("{HEMI}/SHAM_stim3.edf"));
        assert_eq!(p.entities.task, "stim");
        assert_eq!(p.entities.acquisition.as_deref(), Some("SHAM"));
        assert_eq!(p.entities.run.as_deref(), Some("3"));
    }

    #[test]
    fn aborted_files_are_claimed_and_rejected() {
        let rules = RuleSet::default();
        let path = format!("{HEMI}/Resting-state_Pre_ABORTED.edf");
        let raw = RawName::new(&path);
        assert_eq!(rules.first_match(&raw).unwrap().name, "hemianotacs-unusable");
        assert_eq!(rules.parse(&path), Parsed::Unrecognized);
    }

    #[test]
    fn excluded_subject_folders_are_rejected() {
        let path = "EEG/002-0002-AB_HEALTHY_excluded/2_EEG/V2_x/Resting-state_Post.edf";
        assert_eq!(RuleSet::default().parse(path), Parsed::Unrecognized);
    }

    #[test]
    fn explore_meg_and_behavior() {
        let meg = parse("RAW/sub-108/sess_4/meg/explore_run3_raw.fif");
        assert_eq!(meg.entities.subject, "08");
        assert_eq!(meg.entities.session.as_deref(), Some("4"));
        assert_eq!(meg.entities.run.as_deref(), Some("3"));
        assert_eq!(meg.datatype, "meg");
        let beh = parse("RAW/sub-108/sess_4/behavior/data_subject_108_session_4_block2.000000.csv");
        assert_eq!(beh.rule, "explore-behavior");
        assert_eq!(beh.entities.run.as_deref(), Some("2"));
        assert_eq!(beh.datatype, "beh");
        assert_eq!(
            beh.entities.filename(&beh.suffix, "tsv"),
            "sub-08_ses-4_task-explore_run-2_beh.tsv"
        );
    }

    #[test]
    fn clonesa_behavior_tolerates_trailing_star_and_spaces() {
        let p = parse("bhv/sub_03/ses_01/sub_03_tACS _2_probe_min_FT-RSGT_2024_Jan_10_1030.csv*");
        assert_eq!(p.rule, "clonesa-behavior");
        assert_eq!(p.entities.subject, "03");
        assert_eq!(p.entities.session.as_deref(), Some("01"));
        assert_eq!(p.entities.acquisition.as_deref(), Some("tACS"));
        assert_eq!(p.entities.run.as_deref(), Some("2"));
    }

    #[test]
    fn clonesa_eeg_from_folders() {
        let p = parse("3_fif/sub_05/ses_02/recording.fif");
        assert_eq!(p.rule, "clonesa-eeg");
        assert_eq!(p.entities.basename(), "sub-05_ses-02_task-tacs");
    }

    #[test]
    fn generic_bids_names() {
        let p = parse("sub-01_ses-02_task-rest_acq-pre_run-1_eeg.edf");
        assert_eq!(p.rule, "bids-entities");
        assert_eq!(p.entities.basename(), "sub-01_ses-02_task-rest_acq-pre_run-1");
        assert_eq!(p.datatype, "eeg");
        let ch = parse("sub-01/ses-02/eeg/sub-01_ses-02_task-rest_channels.tsv");
        assert_eq!(ch.datatype, "eeg");
        assert_eq!(ch.suffix, "channels");
    }

    #[test]
    fn unknown_names_are_unrecognized() {
        let rules = RuleSet::default();
        for path in ["", "notes.txt", "sub-01_task-rest.edf", "random/dir/file.fif"] {
            assert_eq!(rules.parse(path), Parsed::Unrecognized, "{path}");
        }
    }

    #[test]
    fn parsing_is_deterministic() {
        let path = format!("{HEMI}/Task_PostStim_Stim1.edf");
        assert_eq!(RuleSet::default().parse(&path), RuleSet::default().parse(&path));
    }

    #[test]
    fn study_rule_sets_are_restricted() {
        let hemi = RuleSet::for_study(Study::Hemianotacs);
        assert_eq!(
            hemi.parse("RAW/sub-108/sess_4/meg/explore_run3_raw.fif"),
            Parsed::Unrecognized
        );
        assert_eq!(hemi.rules().last().unwrap().name, "bids-entities");
    }

    #[test]
    fn subject_folder_fields() {
        let folder = parse_subject_folder("001-0042-XY_HEALTHY").unwrap();
        assert_eq!(folder.subject, "0042");
        assert_eq!(folder.group, "HEALTHY");
        assert_eq!(folder.initials, "XY");
        assert!(!folder.excluded);
        assert_eq!(session_from_visit_folder("V12_FOLLOWUP").as_deref(), Some("12"));
    }

    #[test]
    fn study_names_parse_like_config_values() {
        assert_eq!("explore-plus".parse::<Study>(), Ok(Study::ExplorePlus));
        assert_eq!("Hemianotacs".parse::<Study>(), Ok(Study::Hemianotacs));
        assert!("meg".parse::<Study>().is_err());
    }

    #[test]
    fn configured_task_labels_studies_without_task_names() {
        let experiment = ExperimentConfig {
            task: Some("bandit".into()),
            ..ExperimentConfig::default()
        };
        let rules = RuleSet::for_experiment(&experiment);
        let meg = rules
            .parse("RAW/sub-108/sess_4/meg/explore_run3_raw.fif")
            .recognized()
            .unwrap();
        assert_eq!(meg.entities.task, "bandit");
        let rest = rules
            .parse(&format!("{HEMI}/Resting-state_Pre_Stim1.edf"))
            .recognized()
            .unwrap();
        assert_eq!(rest.entities.task, "rest");
        let named = rules
            .parse("sub-01_ses-02_task-flanker_eeg.edf")
            .recognized()
            .unwrap();
        assert_eq!(named.entities.task, "flanker");
    }
}
