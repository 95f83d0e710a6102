pub mod eeg;
pub mod table;
pub mod triggers;

use anyhow::{anyhow, Context, Result};
use glob::{glob, Pattern};
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};

/// Files under `root` matching a glob `pattern` (e.g. `**/*_beh.tsv`),
/// sorted. Paths crossing a directory named in `skip_dirs` (e.g.
/// `derivatives`) are dropped, and symlinked directories are not followed,
/// so a link back into the tree cannot list a file twice.
pub fn glob_files(root: &Path, pattern: &str, skip_dirs: &[&str]) -> Result<Vec<PathBuf>> {
    let root_str = root
        .to_str()
        .ok_or_else(|| anyhow!("{} is not valid UTF-8", root.display()))?;
    let full = format!("{}/{pattern}", Pattern::escape(root_str.trim_end_matches('/')));
    let mut out = Vec::new();
    for entry in glob(&full).with_context(|| format!("bad file pattern {full}"))? {
        let path = match entry {
            Ok(path) => path,
            Err(err) => {
                warn!("{}: {}", err.path().display(), err.error());
                continue;
            }
        };
        if !path.is_file() || crosses_skipped_or_linked_dir(root, &path, skip_dirs) {
            continue;
        }
        out.push(path);
    }
    out.sort();
    out.dedup();
    Ok(out)
}

/// Every regular file under `root`.
pub fn walk_files(root: &Path, skip_dirs: &[&str]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(anyhow!("failed to list {}: not a directory", root.display()));
    }
    glob_files(root, "**/*", skip_dirs)
}

fn crosses_skipped_or_linked_dir(root: &Path, path: &Path, skip_dirs: &[&str]) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    let mut current = root.to_path_buf();
    let mut parts = rel.components().peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            break;
        }
        if skip_dirs.contains(&part.as_os_str().to_string_lossy().as_ref()) {
            return true;
        }
        current.push(part);
        let linked = fs::symlink_metadata(&current)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if linked {
            return true;
        }
    }
    false
}

/// Keep paths that belong to one of `subjects` (matched against any path
/// component, `sub-08` or bare `08`). An empty list keeps everything.
pub fn filter_subjects(paths: Vec<PathBuf>, subjects: &[String]) -> Vec<PathBuf> {
    if subjects.is_empty() {
        return paths;
    }
    let wanted: Vec<String> = subjects
        .iter()
        .map(|s| format!("sub-{}", s.trim_start_matches("sub-")))
        .collect();
    paths
        .into_iter()
        .filter(|p| {
            p.components().any(|c| {
                let part = c.as_os_str().to_string_lossy();
                wanted.iter().any(|w| part == w.as_str())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn walks_and_filters_subjects() {
        let dir = tempdir().unwrap();
        for rel in [
            "sub-01/ses-1/beh/a.tsv",
            "sub-02/ses-1/beh/b.tsv",
            "derivatives/sub-01/c.tsv",
        ] {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "x").unwrap();
        }
        let files = walk_files(dir.path(), &["derivatives"]).unwrap();
        assert_eq!(files.len(), 2);
        let kept = filter_subjects(files, &["01".to_string()]);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].ends_with("sub-01/ses-1/beh/a.tsv"));
    }

    #[test]
    fn glob_patterns_select_by_suffix() {
        let dir = tempdir().unwrap();
        for rel in ["sub-01/ses-1/beh/x_beh.tsv", "sub-01/ses-1/meg/x_events.tsv"] {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "x").unwrap();
        }
        let beh = glob_files(dir.path(), "**/*_beh.tsv", &[]).unwrap();
        assert_eq!(beh.len(), 1);
        assert!(beh[0].ends_with("beh/x_beh.tsv"));
        assert!(walk_files(&dir.path().join("missing"), &[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("sub-01/ses-1/beh/a_beh.tsv");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "x").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub-01/loop")).unwrap();
        let files = walk_files(dir.path(), &[]).unwrap();
        assert_eq!(files, vec![file]);
    }
}
