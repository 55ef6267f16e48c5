//! Append-only CSV log with a sync after every row.
//!
//! The file is created exclusively, so an existing log is never truncated. Each
//! record is encoded in memory, written in one piece and synced to the disk
//! before `append` returns, so a crash loses at most the sample being taken.
//! A write or sync that fails part way cuts the file back to the last synced
//! length, which leaves only whole rows on disk. `finalize` only ever appends
//! below the data rows.

use crate::error::{AppResult, DmmError};
use crate::measurement::{MeasurementFunction, Sample};
use crate::storage::chart::render_line_chart;
use crate::storage::filename::chart_path_for;
use crate::storage::reader::read_log;
use crate::storage::run::{Run, METADATA_TITLE};
use crate::storage::statistics::{
    format_significant, Statistics, COUNT_LABEL, SIGNIFICANT_DIGITS, STATISTICS_TITLE,
};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Byte sink behind a log file.
pub trait LogStorage: Send {
    /// Write all of `bytes` at the current end of the log.
    fn append_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Force everything written so far to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Cut the log back to `len` bytes, sync, and continue writing there.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogStorage for File {
    fn append_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        self.sync_data()
    }
}

/// Creates the storage for a new log.
pub trait LogOpener: Send + Sync {
    /// Create the log at `path`. Must fail if something already exists there.
    fn create(&self, path: &Path) -> io::Result<Box<dyn LogStorage>>;
}

/// Creates logs as files, making missing parent directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLogOpener;

impl LogOpener for FileLogOpener {
    fn create(&self, path: &Path) -> io::Result<Box<dyn LogStorage>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Box::new(file))
    }
}

/// Header labels of the four data columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogColumns {
    /// Sample index, starting at 1.
    pub index: String,
    /// Seconds since the run started.
    pub time: String,
    /// Reading, labeled with function and unit.
    pub value: String,
    /// Wall-clock time of the reading.
    pub clock: String,
}

impl LogColumns {
    /// Columns for a run of `function`: `#`, `Time (s)`, `<label> (<unit>)`, `Clock`.
    pub fn for_function(function: MeasurementFunction) -> Self {
        Self {
            index: "#".to_string(),
            time: "Time (s)".to_string(),
            value: format!("{} ({})", function.label(), function.unit()),
            clock: "Clock".to_string(),
        }
    }

    fn record(&self) -> [&str; 4] {
        [&self.index, &self.time, &self.value, &self.clock]
    }
}

/// What `finalize` added to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeReport {
    /// Data rows in the log.
    pub rows: u64,
    /// The block that was appended, if any.
    pub statistics: Option<Statistics>,
    /// The rendered chart, if one was requested and there was data.
    pub chart_path: Option<PathBuf>,
}

/// Exclusive writer for one run's log file.
pub struct IncrementalLogger {
    path: PathBuf,
    storage: Box<dyn LogStorage>,
    encoder: csv::WriterBuilder,
    synced_len: u64,
    rows: u64,
    poisoned: bool,
}

impl IncrementalLogger {
    /// Create the log file and persist the header.
    ///
    /// # Errors
    /// `Create` if the file exists or the location is not writable.
    pub fn begin(path: &Path, columns: &LogColumns) -> AppResult<Self> {
        Self::begin_with(&FileLogOpener, path, columns)
    }

    /// Like [`IncrementalLogger::begin`], with the storage created by `opener`.
    pub fn begin_with(opener: &dyn LogOpener, path: &Path, columns: &LogColumns) -> AppResult<Self> {
        let storage = opener.create(path).map_err(|source| DmmError::Create {
            path: path.to_path_buf(),
            source,
        })?;

        let mut encoder = csv::WriterBuilder::new();
        encoder.flexible(true);
        let mut logger = Self {
            path: path.to_path_buf(),
            storage,
            encoder,
            synced_len: 0,
            rows: 0,
            poisoned: false,
        };
        logger.write_records([columns.record()])?;

        info!(path = %path.display(), "Log file created");
        Ok(logger)
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Bytes known to be on stable storage.
    pub fn synced_len(&self) -> u64 {
        self.synced_len
    }

    /// Write one data row and sync it to disk.
    ///
    /// # Errors
    /// `Write` if the row could not be written and synced. The file then ends
    /// with the previous row.
    pub fn append(&mut self, sample: &Sample) -> AppResult<()> {
        let record = [
            sample.index.to_string(),
            format!("{:.4}", sample.elapsed_seconds),
            sample.value.to_string(),
            sample.clock_text(),
        ];
        self.write_records([record])?;
        self.rows += 1;
        debug!(index = sample.index, value = sample.value, "Row appended");
        Ok(())
    }

    /// Append the statistics and run blocks and render the chart as requested by `run`.
    ///
    /// Consumes the logger; the file is closed before the chart reads it back.
    pub fn finalize(mut self, run: &Run) -> AppResult<FinalizeReport> {
        let options = run.options();
        let unit = run.function().unit();

        let statistics = if options.include_statistics {
            Statistics::from_values(run.values())
        } else {
            None
        };

        let mut records = Vec::new();
        if let Some(stats) = &statistics {
            records.extend(statistics_records(stats, unit));
        }
        records.push(vec![METADATA_TITLE.to_string()]);
        records.extend(
            run.metadata()
                .into_iter()
                .map(|(label, value)| vec![label.to_string(), value]),
        );
        self.write_records(records)?;

        let rows = self.rows;
        let path = self.path.clone();
        drop(self);

        let chart_path = if options.include_chart {
            render_chart(&path, run.function())?
        } else {
            None
        };

        info!(
            path = %path.display(),
            rows,
            statistics = statistics.is_some(),
            chart = chart_path.is_some(),
            "Log finalized"
        );
        Ok(FinalizeReport {
            rows,
            statistics,
            chart_path,
        })
    }

    /// Encode `records`, write them in one piece and sync.
    fn write_records<I, R>(&mut self, records: I) -> AppResult<()>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator,
        R::Item: AsRef<[u8]>,
    {
        if self.poisoned {
            return Err(self.write_error(
                io::Error::other("log could not be restored after an earlier failed write").into(),
            ));
        }
        let bytes = self.encode(records).map_err(|e| self.write_error(e))?;

        let written = self
            .storage
            .append_bytes(&bytes)
            .and_then(|()| self.storage.sync());
        match written {
            Ok(()) => {
                self.synced_len += bytes.len() as u64;
                Ok(())
            }
            Err(source) => {
                self.roll_back();
                Err(self.write_error(source.into()))
            }
        }
    }

    fn encode<I, R>(&self, records: I) -> Result<Vec<u8>, csv::Error>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator,
        R::Item: AsRef<[u8]>,
    {
        let mut writer = self.encoder.from_writer(Vec::new());
        for record in records {
            writer.write_record(record)?;
        }
        writer.into_inner().map_err(|e| e.into_error().into())
    }

    /// Drop whatever part of a failed write reached the file.
    fn roll_back(&mut self) {
        match self.storage.truncate(self.synced_len) {
            Ok(()) => warn!(
                path = %self.path.display(),
                len = self.synced_len,
                "Write failed, log cut back to last synced row"
            ),
            Err(e) => {
                self.poisoned = true;
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "Write failed and the log could not be cut back"
                );
            }
        }
    }

    fn write_error(&self, source: csv::Error) -> DmmError {
        DmmError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

fn statistics_records(stats: &Statistics, unit: &str) -> Vec<Vec<String>> {
    let mut records = vec![
        vec![STATISTICS_TITLE.to_string()],
        vec![COUNT_LABEL.to_string(), stats.count.to_string()],
    ];
    records.extend(stats.labeled().iter().map(|(label, value)| {
        vec![
            label.to_string(),
            format_significant(*value, SIGNIFICANT_DIGITS),
            unit.to_string(),
        ]
    }));
    records
}

fn render_chart(log_path: &Path, function: MeasurementFunction) -> AppResult<Option<PathBuf>> {
    let contents = read_log(log_path)?;
    if contents.rows.is_empty() {
        warn!(path = %log_path.display(), "No data rows, chart skipped");
        return Ok(None);
    }
    let chart_path = chart_path_for(log_path);
    let y_label = contents
        .header
        .get(2)
        .cloned()
        .unwrap_or_else(|| function.unit().to_string());
    render_line_chart(&contents.points(), function.label(), &y_label, &chart_path)?;
    Ok(Some(chart_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ExportOptions;
    use crate::storage::mock::QuotaOpener;
    use crate::storage::run::RunSetup;
    use chrono::Local;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample(index: u64, value: f64) -> Sample {
        Sample {
            index,
            elapsed_seconds: (index - 1) as f64 * 0.5,
            value,
            function: "DC Voltage".into(),
            unit: "V".into(),
            clock: Local::now(),
        }
    }

    fn columns() -> LogColumns {
        LogColumns::for_function(MeasurementFunction::DcVoltage)
    }

    fn run(path: &Path, options: ExportOptions) -> Run {
        Run::new(
            path.to_path_buf(),
            RunSetup::new(MeasurementFunction::DcVoltage, Duration::from_millis(500)),
            options,
        )
    }

    #[test]
    fn header_is_on_disk_after_begin() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let logger = IncrementalLogger::begin(&path, &columns()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "#,Time (s),DC Voltage (V),Clock\n");
        assert_eq!(logger.synced_len(), text.len() as u64);
    }

    #[test]
    fn begin_never_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "keep me").unwrap();
        let err = IncrementalLogger::begin(&path, &columns()).err().unwrap();
        assert!(matches!(err, DmmError::Create { .. }));
        assert!(err.is_run_fatal());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn begin_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("a.csv");
        IncrementalLogger::begin(&path, &LogColumns::for_function(MeasurementFunction::Frequency))
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn rows_are_readable_while_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("live.csv");
        let mut logger = IncrementalLogger::begin(&path, &columns()).unwrap();
        logger.append(&sample(1, 4.99)).unwrap();
        logger.append(&sample(2, 5.01)).unwrap();

        let contents = read_log(&path).unwrap();
        assert_eq!(contents.indices(), vec![1, 2]);
        assert_eq!(contents.rows[1].value, 5.01);
        assert_eq!(contents.rows[1].elapsed_seconds, 0.5);
        assert_eq!(logger.rows(), 2);
    }

    #[test]
    fn elapsed_has_four_decimals() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fmt.csv");
        let mut logger = IncrementalLogger::begin(&path, &columns()).unwrap();
        let mut first = sample(1, 1.25);
        first.elapsed_seconds = 1.0 / 3.0;
        logger.append(&first).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.starts_with("1,0.3333,1.25,"), "{}", row);
    }

    #[test]
    fn failed_append_leaves_only_whole_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("full.csv");
        // Header plus three rows fit.
        let opener = QuotaOpener::new(4);
        let mut logger = IncrementalLogger::begin_with(&opener, &path, &columns()).unwrap();
        for i in 1..=3 {
            logger.append(&sample(i, i as f64)).unwrap();
        }
        let synced = std::fs::read_to_string(&path).unwrap();

        let err = logger.append(&sample(4, 4.0)).unwrap_err();
        assert!(matches!(err, DmmError::Write { .. }));
        assert!(err.is_run_fatal());
        assert_eq!(logger.rows(), 3);
        drop(logger);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, synced);
        assert!(text.ends_with('\n'));
        assert_eq!(read_log(&path).unwrap().indices(), vec![1, 2, 3]);
    }

    #[test]
    fn failed_finalize_keeps_data_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        let opener = QuotaOpener::new(3);
        let mut run = run(&path, ExportOptions::default());
        let mut logger = IncrementalLogger::begin_with(&opener, &path, &columns()).unwrap();
        for i in 1..=2 {
            let s = sample(i, i as f64);
            logger.append(&s).unwrap();
            run.record(s).unwrap();
        }
        run.finish();

        assert!(matches!(logger.finalize(&run), Err(DmmError::Write { .. })));
        let contents = read_log(&path).unwrap();
        assert_eq!(contents.indices(), vec![1, 2]);
        assert!(contents.statistics.is_empty());
        assert!(contents.metadata.is_empty());
    }

    #[test]
    fn finalize_without_options_only_adds_run_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.csv");
        let mut run = run(
            &path,
            ExportOptions {
                include_statistics: false,
                include_chart: false,
            },
        );
        let mut logger = IncrementalLogger::begin(&path, &columns()).unwrap();
        for (i, v) in [1.0, 2.0].into_iter().enumerate() {
            let s = sample(i as u64 + 1, v);
            logger.append(&s).unwrap();
            run.record(s).unwrap();
        }
        run.finish();
        let before = std::fs::read_to_string(&path).unwrap();
        let report = logger.finalize(&run).unwrap();

        assert_eq!(report.rows, 2);
        assert!(report.statistics.is_none());
        assert!(report.chart_path.is_none());
        let after = std::fs::read_to_string(&path).unwrap();
        assert!(after.starts_with(&before));
        assert!(!after.contains("Statistics"));
        assert!(after[before.len()..].starts_with("Run\n"));
        assert!(!chart_path_for(&path).exists());

        let contents = read_log(&path).unwrap();
        assert_eq!(contents.indices(), vec![1, 2]);
        assert_eq!(contents.metadata_value("Points"), Some("2"));
        assert_eq!(contents.metadata_value("Function"), Some("DC Voltage"));
        assert_eq!(contents.metadata_value("Range"), Some("AUTO"));
        assert_eq!(contents.metadata_value("Interval (ms)"), Some("500"));
    }

    #[test]
    fn finalize_appends_statistics_and_chart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("full.csv");
        let mut run = run(&path, ExportOptions::default());
        let mut logger = IncrementalLogger::begin(&path, &columns()).unwrap();
        for (i, v) in [1.0, 3.0].into_iter().enumerate() {
            let s = sample(i as u64 + 1, v);
            logger.append(&s).unwrap();
            run.record(s).unwrap();
        }
        run.finish();
        let before = std::fs::read_to_string(&path).unwrap();
        let report = logger.finalize(&run).unwrap();

        let after = std::fs::read_to_string(&path).unwrap();
        assert!(after.starts_with(&before));
        assert!(after.contains("Statistics\n"));
        assert!(after.contains("Peak-to-Peak,2,V"));
        assert!(after.find("Statistics").unwrap() < after.find("\nRun\n").unwrap());

        let contents = read_log(&path).unwrap();
        assert_eq!(contents.indices(), vec![1, 2]);
        assert_eq!(contents.statistic("Mean"), Some(2.0));
        assert_eq!(contents.statistic("Samples"), Some(2.0));
        assert_eq!(contents.statistic("NPLC"), None);
        assert_eq!(contents.metadata_value("NPLC"), Some("1"));

        let chart = report.chart_path.unwrap();
        assert_eq!(chart, dir.path().join("full.svg"));
        assert!(chart.exists());
    }

    #[test]
    fn statistics_are_rounded_to_significant_digits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("round.csv");
        let mut run = run(
            &path,
            ExportOptions {
                include_statistics: true,
                include_chart: false,
            },
        );
        let mut logger = IncrementalLogger::begin(&path, &columns()).unwrap();
        for (i, v) in [1.23, 1.25, 1.24].into_iter().enumerate() {
            let s = sample(i as u64 + 1, v);
            logger.append(&s).unwrap();
            run.record(s).unwrap();
        }
        logger.finalize(&run).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\nMean,1.24,V\n"), "{}", text);
        assert!(text.contains("\nPeak-to-Peak,0.02,V\n"), "{}", text);
        assert!(text.contains("\n2,0.5000,1.25,"));
    }

    #[test]
    fn empty_run_skips_statistics_and_chart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let run = run(&path, ExportOptions::default());
        let logger = IncrementalLogger::begin(&path, &columns()).unwrap();
        let report = logger.finalize(&run).unwrap();
        assert!(report.statistics.is_none());
        assert!(report.chart_path.is_none());

        let contents = read_log(&path).unwrap();
        assert!(contents.rows.is_empty());
        assert!(contents.statistics.is_empty());
        assert_eq!(contents.metadata_value("Points"), Some("0"));
    }
}
