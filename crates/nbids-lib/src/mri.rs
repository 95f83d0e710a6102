//! Scanner exports (NIfTI plus JSON/bval/bvec companions) placed into the
//! BIDS tree, and `func/*_events.tsv` files for sessions that have MRI data.

use crate::io::glob_files;
use crate::io::table::{format_number, Table};
use crate::materialize::{MaterializeOptions, MaterializeOutcome};
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Companions copied along with a `.nii.gz` volume.
pub const MRI_COMPANIONS: [&str; 3] = ["json", "bval", "bvec"];

/// Session folders holding one of these count as MRI sessions.
pub const MRI_DATATYPES: [&str; 3] = ["func", "fmap", "anat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MriKind {
    T1w,
    Flair,
    Func,
    Dwi,
    Localizer,
    Unknown,
}

impl fmt::Display for MriKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MriKind::T1w => "T1w",
            MriKind::Flair => "FLAIR",
            MriKind::Func => "func",
            MriKind::Dwi => "dwi",
            MriKind::Localizer => "localizer",
            MriKind::Unknown => "unknown",
        })
    }
}

/// Sequence family from the scanner's export name.
pub fn classify_mri(file_name: &str) -> MriKind {
    let lower = file_name.to_ascii_lowercase();
    if file_name.contains("3DT1") {
        MriKind::T1w
    } else if file_name.contains("FLAIR") {
        MriKind::Flair
    } else if lower.contains("resting") || file_name.contains("MB3_3echo") {
        MriKind::Func
    } else if lower.contains("diff") {
        MriKind::Dwi
    } else if file_name.contains("LOCA") {
        MriKind::Localizer
    } else {
        MriKind::Unknown
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Files directly inside one participant's export folder, by sequence.
pub fn list_mri_files(dir: &Path) -> Result<BTreeMap<MriKind, Vec<PathBuf>>> {
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }
    let mut by_kind: BTreeMap<MriKind, Vec<PathBuf>> = BTreeMap::new();
    for path in glob_files(dir, "*", &[])? {
        by_kind.entry(classify_mri(&file_name_of(&path))).or_default().push(path);
    }
    Ok(by_kind)
}

/// Participant of an MRI export folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MriFolder {
    pub subject: String,
    pub code: String,
}

/// `001-CC` -> `0001`, `001-0042-CC` -> `0042`.
pub fn parse_mri_folder(name: &str) -> Option<MriFolder> {
    let caps = regex!(r"^(\d+)-(?:(\d+)-)?([A-Z]+)").captures(name)?;
    let subject = match caps.get(2) {
        Some(id) => id.as_str().to_string(),
        None => format!("{:0>4}", &caps[1]),
    };
    Some(MriFolder {
        subject,
        code: caps[3].to_string(),
    })
}

/// Extension kept on the BIDS name; `.nii.gz` stays whole.
fn mri_extension(file_name: &str) -> &str {
    if file_name.to_ascii_lowercase().ends_with(".nii.gz") {
        return &file_name[file_name.len() - "nii.gz".len()..];
    }
    file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

fn first_capture(re: &regex::Regex, text: &str) -> Option<String> {
    re.captures(text).map(|c| c[1].to_string())
}

/// BIDS path of one scanner file for `subject`/`session`.
pub fn mri_destination(file_name: &str, subject: &str, session: &str, bids_root: &Path) -> PathBuf {
    let ext = mri_extension(file_name);
    let prefix = format!("sub-{subject}_ses-{session}");
    let dir = |datatype: &str| {
        bids_root
            .join(format!("sub-{subject}"))
            .join(format!("ses-{session}"))
            .join(datatype)
    };
    let run = |re: &regex::Regex| first_capture(re, file_name).unwrap_or_else(|| "1".into());
    let lower = file_name.to_ascii_lowercase();

    if file_name.contains("3DT1") {
        let run = run(regex!(r"3DT1_(\d+)"));
        dir("anat").join(format!("{prefix}_run-{run}_T1w.{ext}"))
    } else if file_name.contains("FLAIR") {
        let run = run(regex!(r"FLAIR_(\d+)"));
        dir("anat").join(format!("{prefix}_run-{run}_FLAIR.{ext}"))
    } else if lower.contains("resting") && file_name.contains("MB3_3echo") {
        let echo = first_capture(regex!(r"_e(\d+)"), file_name).unwrap_or_else(|| "1".into());
        let run = run(regex!(r"resting_(\d+)_"));
        let acq = if file_name.contains("refBLIP") { "_acq-refBLIP" } else { "" };
        dir("func").join(format!("{prefix}_task-rest{acq}_run-{run}_echo-{echo}_bold.{ext}"))
    } else if lower.contains("diff") {
        match regex!(r"diff_D(\d+)_(?:b\d+)?_?(AP|PA)").captures(file_name) {
            Some(caps) => {
                let run = run(regex!(r"_(\d+)\.(?:nii|json|bval|bvec)"));
                dir("dwi").join(format!(
                    "{prefix}_acq-dir{}{}_run-{run}_dwi.{ext}",
                    &caps[1], &caps[2]
                ))
            }
            None => dir("dwi").join(format!("{prefix}_dwi.{ext}")),
        }
    } else if file_name.contains("LOCA") {
        let image = run(regex!(r"i(\d+)"));
        dir("anat").join(format!("{prefix}_acq-localizer_run-{image}_T2w.{ext}"))
    } else {
        dir("anat").join(format!("{prefix}_{file_name}"))
    }
}

/// One planned scanner-file copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MriCopy {
    pub kind: MriKind,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Copies for every `.nii.gz` volume of a known sequence plus its JSON,
/// bval and bvec companions. Unknown sequences are left out.
pub fn plan_mri_copies(
    files: &BTreeMap<MriKind, Vec<PathBuf>>,
    subject: &str,
    session: &str,
    bids_root: &Path,
) -> Vec<MriCopy> {
    let mut copies = Vec::new();
    for (&kind, paths) in files {
        if kind == MriKind::Unknown {
            debug!("{} unknown scanner files left out", paths.len());
            continue;
        }
        let mut volumes: Vec<&PathBuf> = paths
            .iter()
            .filter(|p| p.to_string_lossy().to_ascii_lowercase().ends_with(".nii.gz"))
            .collect();
        volumes.sort();
        for volume in volumes {
            let name = file_name_of(volume);
            let base = &name[..name.len() - ".nii.gz".len()];
            let companions = MRI_COMPANIONS
                .iter()
                .map(|ext| volume.with_file_name(format!("{base}.{ext}")))
                .filter(|p| p.is_file());
            for source in std::iter::once(volume.clone()).chain(companions) {
                copies.push(MriCopy {
                    kind,
                    destination: mri_destination(&file_name_of(&source), subject, session, bids_root),
                    source,
                });
            }
        }
    }
    copies
}

/// Carry out one planned copy. Existing files are kept unless `overwrite`.
pub fn copy_mri_file(copy: &MriCopy, opts: MaterializeOptions) -> Result<MaterializeOutcome> {
    let destination = copy.destination.clone();
    if destination.exists() && !opts.overwrite {
        return Ok(MaterializeOutcome::Skipped { destination });
    }
    if opts.dry_run {
        return Ok(MaterializeOutcome::Planned { destination });
    }
    let dir = destination
        .parent()
        .ok_or_else(|| anyhow!("no parent for {}", destination.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    fs::copy(&copy.source, &destination).with_context(|| {
        format!("copying {} to {}", copy.source.display(), destination.display())
    })?;
    info!("{} -> {}", copy.source.display(), destination.display());
    Ok(MaterializeOutcome::Copied {
        destination,
        sidecars: Vec::new(),
    })
}

fn subject_dir(bids_root: &Path, subject: &str) -> PathBuf {
    bids_root.join(format!("sub-{}", subject.trim_start_matches("sub-")))
}

/// `ses-*` folders of a subject that hold func, fmap or anat data.
pub fn mri_sessions(bids_root: &Path, subject: &str) -> Result<Vec<String>> {
    let dir = subject_dir(bids_root, subject);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut sessions: Vec<String> = fs::read_dir(&dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let path = entry.path();
            MRI_DATATYPES.iter().any(|d| path.join(d).is_dir())
        })
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("ses-"))
        .collect();
    sessions.sort();
    Ok(sessions)
}

/// `*_beh.tsv` files of a subject's MRI sessions.
pub fn mri_behavior_files(bids_root: &Path, subject: &str) -> Result<Vec<PathBuf>> {
    let sessions = mri_sessions(bids_root, subject)?;
    if sessions.is_empty() {
        return Ok(Vec::new());
    }
    let files = glob_files(&subject_dir(bids_root, subject), "ses-*/beh/*_beh.tsv", &[])?;
    Ok(files
        .into_iter()
        .filter(|path| {
            path.components().any(|c| {
                sessions
                    .iter()
                    .any(|s| c.as_os_str().to_string_lossy() == s.as_str())
            })
        })
        .collect())
}

/// Events of a scanner run from its behavior log (milliseconds in, seconds
/// out): `cue` at `trial_start`, `response` at `trial_start + RT`,
/// `feedback` at `outcome_start`. Missing cells produce no event.
pub fn mri_events(behavior: &Table) -> Result<Table> {
    let column = |name: &str| {
        behavior
            .numeric_column(name)
            .ok_or_else(|| anyhow!("behavior log has no {name} column"))
    };
    let trial_start = column("trial_start")?;
    let rt = column("RT")?;
    let outcome = column("outcome_start")?;

    let mut events = Table::new(vec!["onset".into(), "duration".into(), "trial_type".into()]);
    for ((start, rt), outcome) in trial_start.iter().zip(&rt).zip(&outcome) {
        let response = start.zip(*rt).map(|(s, r)| s + r);
        for (kind, onset_ms) in [("cue", *start), ("response", response), ("feedback", *outcome)] {
            if let Some(ms) = onset_ms {
                events.rows.push(vec![
                    format_number(Some(ms / 1000.0)),
                    "0".into(),
                    kind.to_string(),
                ]);
            }
        }
    }
    Ok(events)
}

/// `ses-X/beh/<name>_beh.tsv` -> `ses-X/func/<name>_events.tsv`
pub fn mri_events_path(behavior: &Path) -> Option<PathBuf> {
    let name = behavior.file_name()?.to_string_lossy();
    let base = name.strip_suffix("_beh.tsv")?;
    let session_dir = behavior.parent()?.parent()?;
    Some(session_dir.join("func").join(format!("{base}_events.tsv")))
}

/// Write the events file of one behavior log; returns its path.
pub fn write_mri_events(behavior: &Path, dry_run: bool) -> Result<PathBuf> {
    let out = mri_events_path(behavior)
        .ok_or_else(|| anyhow!("{} is not a *_beh.tsv file", behavior.display()))?;
    let events = mri_events(&Table::read(behavior)?)?;
    if dry_run {
        return Ok(out);
    }
    if let Some(dir) = out.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    events.write_tsv(&out)?;
    info!("{}: {} events", out.display(), events.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scanner_names_map_to_bids() {
        let root = Path::new("/bids");
        let dest = |name: &str| {
            mri_destination(name, "0001", "01", root)
                .strip_prefix("/bids/sub-0001/ses-01")
                .unwrap()
                .to_string_lossy()
                .into_owned()
        };
        assert_eq!(dest("3DT1_3.nii.gz"), "anat/sub-0001_ses-01_run-3_T1w.nii.gz");
        assert_eq!(dest("3DFLAIR_5.json"), "anat/sub-0001_ses-01_run-5_FLAIR.json");
        assert_eq!(
            dest("MB3_3echo_resting_7_e2.nii.gz"),
            "func/sub-0001_ses-01_task-rest_run-7_echo-2_bold.nii.gz"
        );
        assert_eq!(
            dest("MB3_3echo_resting_8_refBLIP_e1.json"),
            "func/sub-0001_ses-01_task-rest_acq-refBLIP_run-8_echo-1_bold.json"
        );
        assert_eq!(
            dest("MB3_EP2D_diff_D60_AP_9.bval"),
            "dwi/sub-0001_ses-01_acq-dir60AP_run-9_dwi.bval"
        );
        assert_eq!(dest("EP2D_diff_trace.nii.gz"), "dwi/sub-0001_ses-01_dwi.nii.gz");
        assert_eq!(
            dest("LOCAHASTE_i00002.nii.gz"),
            "anat/sub-0001_ses-01_acq-localizer_run-00002_T2w.nii.gz"
        );
        assert_eq!(dest("survey.nii.gz"), "anat/sub-0001_ses-01_survey.nii.gz");
    }

    #[test]
    fn export_folders_name_the_participant() {
        assert_eq!(
            parse_mri_folder("001-CC"),
            Some(MriFolder {
                subject: "0001".into(),
                code: "CC".into()
            })
        );
        assert_eq!(parse_mri_folder("001-0042-AB").unwrap().subject, "0042");
        assert_eq!(parse_mri_folder("notes"), None);
    }

    #[test]
    fn volumes_are_copied_with_companions_only() {
        let raw = tempdir().unwrap();
        let bids = tempdir().unwrap();
        for name in [
            "3DT1_3.nii.gz",
            "3DT1_3.json",
            "MB3_EP2D_diff_D60_AP_9.nii.gz",
            "MB3_EP2D_diff_D60_AP_9.bval",
            "MB3_EP2D_diff_D60_AP_9.bvec",
            "FLAIR_4.json",
            "scout.nii.gz",
        ] {
            fs::write(raw.path().join(name), name).unwrap();
        }
        let files = list_mri_files(raw.path()).unwrap();
        assert_eq!(files[&MriKind::Unknown].len(), 1);
        assert_eq!(files[&MriKind::Flair].len(), 1);

        let copies = plan_mri_copies(&files, "0001", "01", bids.path());
        assert_eq!(copies.len(), 5);
        assert!(copies.iter().all(|c| c.kind != MriKind::Flair));

        let dry = MaterializeOptions {
            dry_run: true,
            ..Default::default()
        };
        assert!(matches!(
            copy_mri_file(&copies[0], dry).unwrap(),
            MaterializeOutcome::Planned { .. }
        ));
        for copy in &copies {
            copy_mri_file(copy, MaterializeOptions::default()).unwrap();
        }
        let t1 = bids.path().join("sub-0001/ses-01/anat/sub-0001_ses-01_run-3_T1w.nii.gz");
        assert_eq!(fs::read_to_string(&t1).unwrap(), "3DT1_3.nii.gz");
        assert!(bids
            .path()
            .join("sub-0001/ses-01/dwi/sub-0001_ses-01_acq-dir60AP_run-9_dwi.bvec")
            .exists());
        assert!(matches!(
            copy_mri_file(&copies[0], MaterializeOptions::default()).unwrap(),
            MaterializeOutcome::Skipped { .. }
        ));
    }

    #[test]
    fn events_are_written_for_mri_sessions_only() {
        let bids = tempdir().unwrap();
        let sub = bids.path().join("sub-08");
        let log = "trial_start\tRT\toutcome_start\tstartQuestion\n1000\t450\t2500\tn/a\n5000\tn/a\t6500\t7000\n";
        for session in ["ses-1", "ses-2"] {
            fs::create_dir_all(sub.join(session).join("beh")).unwrap();
            fs::write(
                sub.join(session)
                    .join(format!("beh/sub-08_{session}_task-explore_run-1_beh.tsv")),
                log,
            )
            .unwrap();
        }
        fs::create_dir_all(sub.join("ses-2/anat")).unwrap();

        assert_eq!(mri_sessions(bids.path(), "sub-08").unwrap(), ["ses-2"]);
        let files = mri_behavior_files(bids.path(), "08").unwrap();
        assert_eq!(files.len(), 1);

        let out = write_mri_events(&files[0], false).unwrap();
        assert_eq!(out, sub.join("ses-2/func/sub-08_ses-2_task-explore_run-1_events.tsv"));
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "onset\tduration\ttrial_type\n1\t0\tcue\n1.45\t0\tresponse\n2.5\t0\tfeedback\n5\t0\tcue\n6.5\t0\tfeedback\n"
        );
    }
}
