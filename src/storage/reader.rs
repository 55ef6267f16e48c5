//! Reading a log file back.
//!
//! Used for the chart, which is drawn from what actually reached the disk, and
//! for checking a file while a run is still writing to it.

use crate::error::{AppResult, DmmError};
use crate::storage::run::METADATA_TITLE;
use std::path::Path;

/// One data row as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedRow {
    /// Sample index, starting at 1.
    pub index: u64,
    /// Seconds since the run started, as rounded in the file.
    pub elapsed_seconds: f64,
    /// The reading.
    pub value: f64,
    /// Wall-clock text exactly as written.
    pub clock: String,
}

/// Parsed contents of a log file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogContents {
    /// Column labels of the first row.
    pub header: Vec<String>,
    /// Data rows, in file order.
    pub rows: Vec<LoggedRow>,
    /// Labeled values of the statistics block, in file order.
    pub statistics: Vec<(String, f64)>,
    /// Labeled entries of the run block, in file order.
    pub metadata: Vec<(String, String)>,
}

impl LogContents {
    /// Value of the statistics row labeled `label`.
    pub fn statistic(&self, label: &str) -> Option<f64> {
        self.statistics
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, value)| *value)
    }

    /// Value of the run block entry labeled `label`.
    pub fn metadata_value(&self, label: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, value)| value.as_str())
    }

    /// Indices of the data rows, in file order.
    pub fn indices(&self) -> Vec<u64> {
        self.rows.iter().map(|row| row.index).collect()
    }

    /// `(elapsed_seconds, value)` pairs for plotting.
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .map(|row| (row.elapsed_seconds, row.value))
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Data,
    Statistics,
    Metadata,
}

/// Parse a log file.
///
/// Data rows end at the first record whose index is not an integer. After that,
/// records with a numeric second field are statistics entries until the run
/// block title, and every labeled record after the title is run metadata.
pub fn read_log(path: &Path) -> AppResult<LogContents> {
    let read_error = |source: csv::Error| DmmError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_path(path)
        .map_err(read_error)?;

    let mut contents = LogContents {
        header: reader
            .headers()
            .map_err(read_error)?
            .iter()
            .map(str::to_string)
            .collect(),
        ..LogContents::default()
    };

    let mut section = Section::Data;
    for record in reader.records() {
        let record = record.map_err(read_error)?;
        if section == Section::Data {
            if let Some(row) = parse_row(&record) {
                contents.rows.push(row);
                continue;
            }
            section = Section::Statistics;
        }
        if record.len() == 1 && record.get(0) == Some(METADATA_TITLE) {
            section = Section::Metadata;
            continue;
        }
        let (Some(label), Some(value)) = (record.get(0), record.get(1)) else {
            continue;
        };
        match section {
            Section::Metadata => contents.metadata.push((label.to_string(), value.to_string())),
            _ => {
                if let Ok(value) = value.trim().parse::<f64>() {
                    contents.statistics.push((label.to_string(), value));
                }
            }
        }
    }

    Ok(contents)
}

fn parse_row(record: &csv::StringRecord) -> Option<LoggedRow> {
    let index = record.get(0)?.trim().parse::<u64>().ok()?;
    Some(LoggedRow {
        index,
        elapsed_seconds: record.get(1)?.trim().parse().ok()?,
        value: record.get(2)?.trim().parse().ok()?,
        clock: record.get(3).unwrap_or_default().to_string(),
    })
}
