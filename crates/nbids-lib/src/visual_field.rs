//! Visual-field exam material of the hemianotACS tree: the per-visit
//! `EEG_VISUAL_FIELD` folders and PDF reports go next to the session's EEG,
//! the group-level `data-VisualField` folder goes to derivatives.

use crate::audit::EEG_FOLDER;
use crate::entities::{parse_subject_folder, session_from_visit_folder};
use crate::io::glob_files;
use crate::materialize::{MaterializeOptions, MaterializeOutcome};
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-visit folder of visual-field recordings.
pub const VISUAL_FIELD_FOLDER: &str = "EEG_VISUAL_FIELD";

/// Group-level visual-field data, directly under the raw root.
pub const VISUAL_FIELD_DATA: &str = "data-VisualField";

/// Lower-case name fragments marking a PDF as a visual-field report.
const PDF_KEYWORDS: [&str; 4] = ["visual", "field", "vf", "champ"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisualFieldItem {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Whole folder rather than a single file.
    pub folder: bool,
}

fn is_visual_field_pdf(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".pdf") && PDF_KEYWORDS.iter().any(|kw| name.contains(kw))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Visual-field folders and reports of every included participant, mapped
/// to `sub-X/ses-Y/eeg/visual_field/` and `sub-X/ses-Y/eeg/<report>.pdf`.
pub fn plan_visual_field(raw_dir: &Path, bids_dir: &Path) -> Result<Vec<VisualFieldItem>> {
    let mut items = Vec::new();
    for subject_dir in sorted_subdirs(raw_dir)? {
        let name = file_name_of(&subject_dir);
        let Some(folder) = parse_subject_folder(&name) else {
            continue;
        };
        if folder.excluded {
            debug!("excluded participant folder: {name}");
            continue;
        }
        let eeg_dir = subject_dir.join(EEG_FOLDER);
        if !eeg_dir.is_dir() {
            continue;
        }
        for visit in sorted_subdirs(&eeg_dir)? {
            let Some(session) = session_from_visit_folder(&file_name_of(&visit)) else {
                continue;
            };
            let target = bids_dir
                .join(format!("sub-{}", folder.subject))
                .join(format!("ses-{session}"))
                .join("eeg");
            let recordings = visit.join(VISUAL_FIELD_FOLDER);
            if recordings.is_dir() {
                items.push(VisualFieldItem {
                    source: recordings,
                    destination: target.join("visual_field"),
                    folder: true,
                });
            }
            for pdf in glob_files(&visit, "*", &[])? {
                if !is_visual_field_pdf(&pdf) {
                    continue;
                }
                let Some(file_name) = pdf.file_name() else {
                    continue;
                };
                items.push(VisualFieldItem {
                    destination: target.join(file_name),
                    source: pdf,
                    folder: false,
                });
            }
        }
    }
    Ok(items)
}

/// Copy every file under `source` to the same relative place under
/// `destination`. Returns the number of files copied.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<usize> {
    let files = glob_files(source, "**/*", &[])?;
    fs::create_dir_all(destination)
        .with_context(|| format!("creating {}", destination.display()))?;
    for file in &files {
        let rel = file
            .strip_prefix(source)
            .map_err(|_| anyhow!("{} is outside {}", file.display(), source.display()))?;
        let target = destination.join(rel);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        fs::copy(file, &target)
            .with_context(|| format!("copying {} to {}", file.display(), target.display()))?;
    }
    Ok(files.len())
}

fn copy_item(
    source: &Path,
    destination: &Path,
    folder: bool,
    opts: MaterializeOptions,
) -> Result<MaterializeOutcome> {
    let destination = destination.to_path_buf();
    if destination.exists() && !opts.overwrite {
        debug!("exists, skipped: {}", destination.display());
        return Ok(MaterializeOutcome::Skipped { destination });
    }
    if opts.dry_run {
        return Ok(MaterializeOutcome::Planned { destination });
    }
    if folder {
        if destination.is_dir() {
            fs::remove_dir_all(&destination)
                .with_context(|| format!("replacing {}", destination.display()))?;
        }
        let files = copy_tree(source, &destination)?;
        info!("{} -> {} ({files} files)", source.display(), destination.display());
    } else {
        if let Some(dir) = destination.parent() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        fs::copy(source, &destination).with_context(|| {
            format!("copying {} to {}", source.display(), destination.display())
        })?;
        info!("{} -> {}", source.display(), destination.display());
    }
    Ok(MaterializeOutcome::Copied {
        destination,
        sidecars: Vec::new(),
    })
}

/// Copy one planned folder or report. An existing copy is replaced only
/// with `overwrite`.
pub fn copy_visual_field(
    item: &VisualFieldItem,
    opts: MaterializeOptions,
) -> Result<MaterializeOutcome> {
    copy_item(&item.source, &item.destination, item.folder, opts)
}

/// `<raw_dir>/data-VisualField` -> `<derivatives_dir>/data-VisualField`.
/// `Ok(None)` when the raw folder does not exist.
pub fn copy_visual_field_to_derivatives(
    raw_dir: &Path,
    derivatives_dir: &Path,
    opts: MaterializeOptions,
) -> Result<Option<MaterializeOutcome>> {
    let source = raw_dir.join(VISUAL_FIELD_DATA);
    if !source.is_dir() {
        return Ok(None);
    }
    copy_item(&source, &derivatives_dir.join(VISUAL_FIELD_DATA), true, opts).map(Some)
}
