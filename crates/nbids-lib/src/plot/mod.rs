//! Backend-agnostic figures for the timing diagnostics. Rendering lives in
//! the CLI.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(self) -> (u8, u8, u8) {
        ((self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScatterSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub radius: u32,
    pub color: Color,
}

/// Counts of equal-width bins starting at `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSeries {
    pub name: String,
    pub start: f64,
    pub bin_width: f64,
    pub counts: Vec<usize>,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Scatter(ScatterSeries),
    Histogram(HistogramSeries),
}

impl Series {
    /// (x_min, x_max, y_min, y_max) of the data, if any.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        match self {
            Series::Line(LineSeries { points, .. }) | Series::Scatter(ScatterSeries { points, .. }) => {
                bounds_of(points)
            }
            Series::Histogram(h) => {
                if h.counts.is_empty() {
                    return None;
                }
                let end = h.start + h.bin_width * h.counts.len() as f64;
                let top = h.counts.iter().copied().max().unwrap_or(0) as f64;
                Some((h.start, end, 0.0, top))
            }
        }
    }
}

fn bounds_of(points: &[[f64; 2]]) -> Option<(f64, f64, f64, f64)> {
    let first = points.first()?;
    Some(points.iter().fold(
        (first[0], first[0], first[1], first[1]),
        |(x0, x1, y0, y1), p| (x0.min(p[0]), x1.max(p[0]), y0.min(p[1]), y1.max(p[1])),
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis::default(),
            y: Axis::default(),
            series: Vec::new(),
        }
    }

    pub fn with_labels(mut self, x: &str, y: &str) -> Self {
        self.x.label = Some(x.into());
        self.y.label = Some(y.into());
        self
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// Union of all series bounds, padded when degenerate.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let (mut x0, mut x1, mut y0, mut y1) = self
            .series
            .iter()
            .filter_map(Series::bounds)
            .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1), a.2.min(b.2), a.3.max(b.3)))?;
        if x1 - x0 < f64::EPSILON {
            x0 -= 1.0;
            x1 += 1.0;
        }
        if y1 - y0 < f64::EPSILON {
            y0 -= 1.0;
            y1 += 1.0;
        }
        Some((x0, x1, y0, y1))
    }
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

/// Behavior intervals against recording intervals, with the `y = x` line a
/// coherent run falls on. Pairs are `(behtime_diff, onset_diff)`.
pub fn timing_scatter(title: &str, pairs: &[(f64, f64)], max_points: usize) -> Figure {
    let points: Vec<[f64; 2]> = pairs.iter().map(|&(b, o)| [b, o]).collect();
    let mut fig = Figure::new(Some(title.to_string()))
        .with_labels("behavior interval (s)", "recording interval (s)");
    if let Some((lo, hi, _, _)) = bounds_of(&points) {
        fig.add_series(Series::Line(LineSeries {
            name: "y = x".into(),
            points: vec![[lo, lo], [hi, hi]],
            style: Style {
                width: 1.5,
                color: Color(0xD62728),
            },
        }));
    }
    fig.add_series(Series::Scatter(ScatterSeries {
        name: "events".into(),
        points: decimate_points(&points, max_points),
        radius: 3,
        color: Color(0x1F77B4),
    }));
    fig
}

/// Distribution of `onset_diff - behtime_diff` in milliseconds over 1 ms
/// bins from -30 to 30 ms; values outside are not counted.
pub fn timing_histogram(title: &str, pairs: &[(f64, f64)]) -> Figure {
    const START: f64 = -30.0;
    const BINS: usize = 61;
    let mut counts = vec![0usize; BINS];
    for &(behtime, onset) in pairs {
        let ms = (onset - behtime) * 1000.0;
        let bin = (ms - START).floor();
        if bin >= 0.0 && (bin as usize) < BINS {
            counts[bin as usize] += 1;
        }
    }
    let mut fig = Figure::new(Some(title.to_string())).with_labels("onset - behavior (ms)", "count");
    fig.add_series(Series::Histogram(HistogramSeries {
        name: "difference".into(),
        start: START,
        bin_width: 1.0,
        counts,
        color: Color(0x1F77B4),
    }));
    fig
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scatter_includes_identity_line() {
        let fig = timing_scatter("response", &[(4.0, 4.002), (3.5, 3.49)], 1024);
        assert_eq!(fig.series.len(), 2);
        let Series::Line(line) = &fig.series[0] else {
            panic!("identity line first");
        };
        assert_eq!(line.points, vec![[3.5, 3.5], [4.0, 4.0]]);
        let (x0, x1, _, _) = fig.bounds().unwrap();
        assert_eq!((x0, x1), (3.5, 4.0));
    }

    #[test]
    fn histogram_bins_by_millisecond() {
        let fig = timing_histogram("feedback", &[(1.0, 1.0), (1.0, 1.0025), (1.0, 2.0)]);
        let Series::Histogram(h) = &fig.series[0] else {
            panic!("histogram");
        };
        assert_eq!(h.counts.iter().sum::<usize>(), 2);
        assert_eq!(h.counts[30], 1);
        assert_eq!(h.counts[32], 1);
    }

    #[test]
    fn decimation_keeps_first_point() {
        let points: Vec<[f64; 2]> = (0..100).map(|i| [i as f64, 0.0]).collect();
        let out = decimate_points(&points, 10);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], [0.0, 0.0]);
        assert!(timing_scatter("empty", &[], 10).bounds().is_none());
    }
}
