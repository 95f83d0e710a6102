use serde::{Deserialize, Serialize};

/// Basic typed time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Trigger onsets of one source, as sample indices (sorted).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerTrain {
    pub samples: Vec<u64>,
}

impl TriggerTrain {
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        samples.sort_unstable();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Onsets in milliseconds on the recording clock.
    pub fn onsets_ms(&self, fs: f64) -> Vec<f64> {
        self.samples
            .iter()
            .map(|&s| s as f64 * 1000.0 / fs)
            .collect()
    }

    /// Merge two trains (e.g. answer keys wired to distinct lines).
    pub fn merge(&self, other: &TriggerTrain) -> TriggerTrain {
        let mut samples = self.samples.clone();
        samples.extend_from_slice(&other.samples);
        TriggerTrain::from_samples(samples)
    }
}

/// Sum stim channels sample-wise so several lines read as one trigger source.
/// Channels must share a sampling rate; the result is truncated to the
/// shortest channel.
pub fn combine_channels(channels: &[TimeSeries]) -> Option<TimeSeries> {
    let first = channels.first()?;
    if channels.iter().any(|c| (c.fs - first.fs).abs() > f64::EPSILON) {
        return None;
    }
    let len = channels.iter().map(|c| c.len()).min().unwrap_or(0);
    let data = (0..len)
        .map(|i| channels.iter().map(|c| c.data[i]).sum())
        .collect();
    Some(TimeSeries { fs: first.fs, data })
}

/// Detect trigger onsets on a stim channel.
///
/// An onset is a sample whose (integer) level rises above the previous one.
/// A level already present on the first sample is not an event. Steps held
/// for fewer than `shortest_event` samples are discarded as glitches.
pub fn find_events(ts: &TimeSeries, shortest_event: usize) -> TriggerTrain {
    let levels: Vec<i64> = ts.data.iter().map(|v| v.round() as i64).collect();
    let mut samples = Vec::new();
    let mut i = 1;
    while i < levels.len() {
        let level = levels[i];
        if level != 0 && level > levels[i - 1] {
            let mut end = i + 1;
            while end < levels.len() && levels[end] == level {
                end += 1;
            }
            if end - i >= shortest_event.max(1) {
                samples.push(i as u64);
            }
            i = end;
        } else {
            i += 1;
        }
    }
    TriggerTrain::from_samples(samples)
}
