use crate::config::AlignmentConfig;
use crate::events::{EventKind, RunTriggers};
use crate::signal::{combine_channels, find_events, TimeSeries};
use anyhow::{anyhow, bail, Result};
use edf_reader::file_reader::SyncFileReader;
use edf_reader::sync_reader::SyncEDFReader;
use log::{debug, warn};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Helper implementing the EDF reader trait for on-disk files.
struct DiskFileReader {
    path: PathBuf,
}

impl DiskFileReader {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl SyncFileReader for DiskFileReader {
    fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, std::io::Error> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// An opened EDF recording with its full data window read once.
pub struct EdfRecording {
    labels: Vec<String>,
    rates: Vec<f64>,
    data: Vec<Vec<f32>>,
}

impl EdfRecording {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = SyncEDFReader::init_with_file_reader(DiskFileReader::new(path))?;
        let header = &reader.edf_header;
        let total_duration = header.block_duration * header.number_of_blocks;
        let labels = header
            .channels
            .iter()
            .map(|c| c.label.trim().to_string())
            .collect();
        let rates = header
            .channels
            .iter()
            .map(|c| {
                c.number_of_samples_in_data_record as f64 * 1000.0 / header.block_duration as f64
            })
            .collect();
        let data = reader.read_data_window(0, total_duration)?;
        Ok(Self {
            labels,
            rates,
            data,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn channel(&self, index: usize) -> Result<TimeSeries> {
        let data = self.data.get(index).ok_or_else(|| {
            anyhow!(
                "EDF file has {} channels; channel {} is out of range",
                self.labels.len(),
                index
            )
        })?;
        Ok(TimeSeries {
            fs: self.rates[index],
            data: data.iter().map(|value| *value as f64).collect(),
        })
    }

    pub fn channel_by_label(&self, label: &str) -> Option<TimeSeries> {
        let index = self.labels.iter().position(|l| l == label)?;
        self.channel(index).ok()
    }

    /// Trigger onsets per event type, reading the stim channels named in the
    /// config. Channels of one type are summed before edge detection. A type
    /// whose channels are all absent yields an empty train. Every stim
    /// channel must share one sampling rate, which becomes the run's.
    pub fn triggers(&self, cfg: &AlignmentConfig) -> Result<RunTriggers> {
        let mut sfreq: Option<f64> = None;
        let mut trains = Vec::new();
        for (name, labels) in &cfg.channels {
            let Some(kind) = EventKind::from_name(name) else {
                continue;
            };
            let mut channels = Vec::new();
            for label in labels {
                let Some(ch) = self.channel_by_label(label) else {
                    warn!("stim channel {label} ({kind}) not found in recording");
                    continue;
                };
                match sfreq {
                    None => sfreq = Some(ch.fs),
                    Some(fs) if (fs - ch.fs).abs() > f64::EPSILON => {
                        warn!("stim channel {label} ({kind}) at {} Hz, expected {fs} Hz", ch.fs);
                        bail!(
                            "stim channels have different sampling rates: {label} ({kind}) at {} Hz, others at {fs} Hz",
                            ch.fs
                        );
                    }
                    Some(_) => {}
                }
                channels.push(ch);
            }
            let Some(combined) = combine_channels(&channels) else {
                continue;
            };
            let train = find_events(&combined, cfg.shortest_event);
            debug!("{kind}: {} onsets on {:?}", train.len(), labels);
            trains.push((kind, train));
        }
        let mut triggers = RunTriggers::new(sfreq.unwrap_or(cfg.sfreq));
        for (kind, train) in trains {
            triggers.insert(kind, train);
        }
        Ok(triggers)
    }
}

/// Extract run triggers from the stim channels of an EDF recording.
pub fn load_edf_triggers(path: &Path, cfg: &AlignmentConfig) -> Result<RunTriggers> {
    EdfRecording::open(path)?.triggers(cfg)
}
