//! Placing raw files into the BIDS tree, plus the in-place repair helpers.

use crate::behavior::{convert_to_tsv, write_sidecar};
use crate::entities::ParsedName;
use crate::io::{glob_files, table::Table};
use anyhow::{anyhow, Context, Result};
use glob::Pattern;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct MaterializeOptions {
    pub overwrite: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializeOutcome {
    Copied {
        destination: PathBuf,
        sidecars: Vec<PathBuf>,
    },
    Skipped {
        destination: PathBuf,
    },
    Planned {
        destination: PathBuf,
    },
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn is_behavior_csv(source: &Path, parsed: &ParsedName) -> bool {
    parsed.datatype == "beh" && extension_of(source) == "csv"
}

/// BIDS path of a recognized raw file. Behavior CSVs become `.tsv`.
pub fn destination_for(bids_dir: &Path, parsed: &ParsedName, source: &Path) -> PathBuf {
    let ext = if is_behavior_csv(source, parsed) {
        "tsv".to_string()
    } else {
        extension_of(source)
    };
    parsed
        .entities
        .directory(bids_dir, &parsed.datatype)
        .join(parsed.entities.filename(&parsed.suffix, &ext))
}

/// Every other file next to `path` named `<stem>.<anything>`: the `.easy`
/// and `.info` of an EDF, the `.eeg` and `.vmrk` of a BrainVision header, a
/// `.json` sidecar, and so on.
pub fn find_sidecars(path: &Path) -> Result<Vec<PathBuf>> {
    let (Some(name), Some(stem)) = (path.file_name(), path.file_stem()) else {
        return Ok(Vec::new());
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let pattern = format!("{}.*", Pattern::escape(&stem.to_string_lossy()));
    Ok(glob_files(dir, &pattern, &[])?
        .into_iter()
        .filter(|candidate| candidate.file_name() != Some(name))
        .collect())
}

/// Extension to give a sidecar of `primary` once renamed: whatever follows
/// the shared stem, so `x.nii.gz` next to `x.json` keeps `nii.gz`.
fn sidecar_extension(sidecar: &Path, primary: &Path) -> String {
    let stem = primary
        .file_stem()
        .map(|s| format!("{}.", s.to_string_lossy()))
        .unwrap_or_default();
    sidecar
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .and_then(|n| n.strip_prefix(&stem).map(str::to_ascii_lowercase))
        .unwrap_or_else(|| extension_of(sidecar))
}

/// Copy one raw file (and its sidecars) to its BIDS destination.
///
/// An existing destination is left alone unless `overwrite`. A dry run only
/// reports where the file would go.
pub fn materialize(
    source: &Path,
    parsed: &ParsedName,
    bids_dir: &Path,
    opts: MaterializeOptions,
) -> Result<MaterializeOutcome> {
    let destination = destination_for(bids_dir, parsed, source);
    if destination.exists() && !opts.overwrite {
        debug!("exists, skipped: {}", destination.display());
        return Ok(MaterializeOutcome::Skipped { destination });
    }
    if opts.dry_run {
        return Ok(MaterializeOutcome::Planned { destination });
    }
    let dir = destination
        .parent()
        .ok_or_else(|| anyhow!("no parent for {}", destination.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    if is_behavior_csv(source, parsed) {
        let rows = convert_to_tsv(source, &destination)?;
        let json = destination.with_extension("json");
        let task = &parsed.entities.task;
        write_sidecar(&json, task, &format!("Behavioral data for task {task}"))?;
        info!("{} -> {} ({rows} trials)", source.display(), destination.display());
        return Ok(MaterializeOutcome::Copied {
            destination,
            sidecars: vec![json],
        });
    }

    fs::copy(source, &destination)
        .with_context(|| format!("copying {} to {}", source.display(), destination.display()))?;
    let mut sidecars = Vec::new();
    for sidecar in find_sidecars(source)? {
        let target = destination.with_extension(sidecar_extension(&sidecar, source));
        if target == destination {
            warn!("{}: same name as the recording once renamed, not copied", sidecar.display());
            continue;
        }
        fs::copy(&sidecar, &target)
            .with_context(|| format!("copying sidecar {}", sidecar.display()))?;
        sidecars.push(target);
    }
    if extension_of(&destination) == "vhdr" {
        rewrite_vhdr_references(&destination)?;
    }
    info!("{} -> {}", source.display(), destination.display());
    Ok(MaterializeOutcome::Copied {
        destination,
        sidecars,
    })
}

/// Point a BrainVision header's `DataFile=` and `MarkerFile=` entries at the
/// files that share its own stem. Returns whether the header changed.
pub fn rewrite_vhdr_references(vhdr: &Path) -> Result<bool> {
    let content =
        fs::read_to_string(vhdr).with_context(|| format!("reading {}", vhdr.display()))?;
    let stem = vhdr
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("no file name: {}", vhdr.display()))?;
    let mut changed = false;
    let lines: Vec<String> = content
        .lines()
        .map(|line| {
            let rewritten = if let Some(old) = line.strip_prefix("DataFile=") {
                let ext = Path::new(old.trim())
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "eeg".into());
                format!("DataFile={stem}.{ext}")
            } else if line.starts_with("MarkerFile=") {
                format!("MarkerFile={stem}.vmrk")
            } else {
                return line.to_string();
            };
            changed |= rewritten != line;
            rewritten
        })
        .collect();
    if changed {
        let mut out = lines.join("\n");
        if content.ends_with('\n') {
            out.push('\n');
        }
        fs::write(vhdr, out).with_context(|| format!("writing {}", vhdr.display()))?;
    }
    Ok(changed)
}

/// Numeric run label for a BIDS file name: `run-OG1` -> `run-1`, and `run-1`
/// inserted before the suffix when no run is present. `None` when the name
/// needs no change.
pub fn fix_run_label(file_name: &str) -> Option<String> {
    if let Some(caps) = regex!(r"_run-([A-Za-z]+)(\d+)").captures(file_name) {
        let whole = caps.get(0)?;
        let mut fixed = file_name.to_string();
        fixed.replace_range(whole.range(), &format!("_run-{}", &caps[2]));
        return Some(fixed);
    }
    if file_name.contains("_run-") || !file_name.starts_with("sub-") {
        return None;
    }
    let (base, suffix) = file_name.rsplit_once('_')?;
    Some(format!("{base}_run-1_{suffix}"))
}

/// Rename a file and its same-stem companions to carry a fixed run label.
/// Returns the `(from, to)` moves; empty when nothing needs doing or the
/// target already exists.
pub fn rename_with_sidecars(path: &Path, dry_run: bool) -> Result<Vec<(PathBuf, PathBuf)>> {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(Vec::new());
    };
    let Some(new_name) = fix_run_label(&name) else {
        return Ok(Vec::new());
    };
    let target = path.with_file_name(&new_name);
    if target.exists() {
        warn!("{} already exists, not renaming {}", target.display(), path.display());
        return Ok(Vec::new());
    }
    let mut moves = vec![(path.to_path_buf(), target.clone())];
    for sidecar in find_sidecars(path)? {
        let to = target.with_extension(sidecar_extension(&sidecar, path));
        moves.push((sidecar, to));
    }
    if dry_run {
        return Ok(moves);
    }
    for (from, to) in &moves {
        fs::rename(from, to)
            .with_context(|| format!("renaming {} to {}", from.display(), to.display()))?;
    }
    if extension_of(&target) == "vhdr" {
        rewrite_vhdr_references(&target)?;
    }
    Ok(moves)
}

/// Set `new_type` on `*_channels.tsv` rows whose name is in `names`. Returns
/// the number of rows that change; the file is only rewritten outside dry
/// runs and when something changes.
pub fn patch_channel_types(
    path: &Path,
    names: &[String],
    new_type: &str,
    dry_run: bool,
) -> Result<usize> {
    let mut table = Table::read(path)?;
    let (Some(name_idx), Some(type_idx)) = (table.column_index("name"), table.column_index("type"))
    else {
        debug!("{}: no name/type columns", path.display());
        return Ok(0);
    };
    let mut changed = 0;
    for row in &mut table.rows {
        if names.iter().any(|n| n == &row[name_idx]) && row[type_idx] != new_type {
            row[type_idx] = new_type.to_string();
            changed += 1;
        }
    }
    if changed > 0 && !dry_run {
        table.write_tsv(path)?;
    }
    Ok(changed)
}
