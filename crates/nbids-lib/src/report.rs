use log::warn;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub path: PathBuf,
    pub reason: String,
}

/// Tally of a batch run. Per-file failures are recorded and the batch moves on.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub unrecognized: usize,
    pub failures: Vec<Failure>,
}

impl BatchReport {
    pub fn record_processed(&mut self) {
        self.processed += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_unrecognized(&mut self, path: &Path) {
        log::debug!("unrecognized: {}", path.display());
        self.unrecognized += 1;
    }

    pub fn record_failure(&mut self, path: &Path, err: impl fmt::Display) {
        warn!("{}: {err}", path.display());
        self.failures.push(Failure {
            path: path.to_path_buf(),
            reason: err.to_string(),
        });
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.unrecognized + self.failed()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Files seen:   {}", self.total())?;
        writeln!(f, "Processed:    {}", self.processed)?;
        writeln!(f, "Skipped:      {}", self.skipped)?;
        writeln!(f, "Unrecognized: {}", self.unrecognized)?;
        write!(f, "Failed:       {}", self.failed())?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.path.display(), failure.reason)?;
        }
        Ok(())
    }
}
