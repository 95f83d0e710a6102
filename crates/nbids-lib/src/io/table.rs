use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Missing-value spellings found in lab exports.
const MISSING: [&str; 5] = ["", "n/a", "na", "nan", "none"];

/// Header plus string cells of a delimited text file. Cells are kept
/// verbatim so columns the pipeline does not understand round-trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Tab for `.tsv`, comma otherwise.
pub fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::read_with_delimiter(path, delimiter_for(path))
    }

    pub fn read_with_delimiter(path: &Path, delimiter: u8) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::from_reader(file, delimiter).with_context(|| format!("reading {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(Trim::Headers)
            .from_reader(reader);
        let headers: Vec<String> = reader
            .headers()
            .context("reading header")?
            .iter()
            .map(String::from)
            .collect();
        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("reading row {}", idx + 1))?;
            let mut row: Vec<String> = record.iter().map(String::from).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        self.write_with_delimiter(path, b'\t')
    }

    pub fn write_with_delimiter(&self, path: &Path, delimiter: u8) -> Result<()> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut writer = WriterBuilder::new().delimiter(delimiter).from_writer(file);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| self.column_index(c).is_none())
            .map(|c| c.to_string())
            .collect()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Column parsed as numbers; missing or unparsable cells are `None`.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).and_then(|v| parse_number(v)))
                .collect(),
        )
    }

    /// Append a column; `values` must have one entry per row.
    pub fn push_column(&mut self, name: &str, values: Vec<String>) {
        debug_assert_eq!(values.len(), self.rows.len());
        self.headers.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    /// Replace a column if present, append otherwise.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) {
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => self.push_column(name, values),
        }
    }
}

pub fn parse_number(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if MISSING.contains(&trimmed.to_ascii_lowercase().as_str()) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// BIDS spells missing numbers `n/a`.
pub fn format_number(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "n/a".into(),
    }
}

/// Round numeric-looking cells with a fractional part to `decimals`.
pub fn round_cell(cell: &str, decimals: i32) -> String {
    if !cell.contains('.') {
        return cell.to_string();
    }
    match cell.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => {
            let scale = 10f64.powi(decimals);
            // + 0.0 folds -0 into 0
            ((v * scale).round() / scale + 0.0).to_string()
        }
        _ => cell.to_string(),
    }
}
