//! Durability properties of the incremental log.
//!
//! - every appended row is on disk when `append` returns
//! - a reader at any time sees a prefix of the final data rows
//! - finalize only appends
//! - a failed append leaves the file ending with the last whole row
//! - file naming never reuses an existing log or chart name

use chrono::Local;
use dmm_logger::error::DmmError;
use dmm_logger::measurement::{ExportOptions, MeasurementFunction, Sample};
use dmm_logger::storage::{
    chart_path_for, read_log, FilenamePolicy, IncrementalLogger, LogColumns, QuotaOpener, Run,
    RunSetup, SuffixPolicy,
};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn sample(index: u64, value: f64) -> Sample {
    Sample {
        index,
        elapsed_seconds: (index - 1) as f64 * 0.25,
        value,
        function: "DC Voltage".into(),
        unit: "V".into(),
        clock: Local::now(),
    }
}

fn setup() -> RunSetup {
    RunSetup::new(MeasurementFunction::DcVoltage, Duration::from_millis(250))
}

fn begin(path: &Path) -> IncrementalLogger {
    IncrementalLogger::begin(path, &LogColumns::for_function(MeasurementFunction::DcVoltage))
        .expect("log should be created")
}

#[test]
fn rows_survive_without_drop() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crash.csv");
    let mut logger = begin(&path);
    for i in 1..=5 {
        logger.append(&sample(i, i as f64 * 0.1)).unwrap();
    }

    // Simulate a crash: no destructor, no finalize.
    std::mem::forget(logger);

    let contents = read_log(&path).unwrap();
    assert_eq!(contents.indices(), vec![1, 2, 3, 4, 5]);
    assert_eq!(contents.rows[4].value, 0.5);
}

#[test]
fn mid_run_reads_are_prefixes_of_final_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("prefix.csv");
    let mut run = Run::new(path.clone(), setup(), ExportOptions::default());
    let mut logger = begin(&path);

    let mut snapshots = Vec::new();
    for i in 1..=6 {
        let s = sample(i, 5.0 + i as f64 * 0.001);
        logger.append(&s).unwrap();
        run.record(s).unwrap();
        snapshots.push(read_log(&path).unwrap().rows);
    }
    run.finish();
    logger.finalize(&run).unwrap();

    let final_rows = read_log(&path).unwrap().rows;
    assert_eq!(final_rows.len(), 6);
    for (n, snapshot) in snapshots.iter().enumerate() {
        assert_eq!(snapshot.len(), n + 1);
        assert_eq!(snapshot.as_slice(), &final_rows[..n + 1]);
    }
}

#[test]
fn statistics_mean_matches_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stats.csv");
    let values = [4.998, 5.003, 5.001, 4.999, 5.002];
    let mut run = Run::new(
        path.clone(),
        setup(),
        ExportOptions {
            include_statistics: true,
            include_chart: false,
        },
    );
    let mut logger = begin(&path);
    for (i, v) in values.iter().enumerate() {
        let s = sample(i as u64 + 1, *v);
        logger.append(&s).unwrap();
        run.record(s).unwrap();
    }
    let report = logger.finalize(&run).unwrap();

    let expected = values.iter().sum::<f64>() / values.len() as f64;
    let contents = read_log(&path).unwrap();
    let mean = contents.statistic("Mean").unwrap();
    assert!((mean - expected).abs() < 1e-9);
    assert_eq!(contents.statistic("Minimum"), Some(4.998));
    assert_eq!(contents.statistic("Maximum"), Some(5.003));
    assert!(contents.statistic("Std Dev").unwrap() > 0.0);
    assert_eq!(report.statistics.map(|s| s.count), Some(5));
    assert!(!chart_path_for(&path).exists());
}

#[test]
fn full_disk_mid_run_keeps_only_appended_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("full.csv");
    let columns = LogColumns::for_function(MeasurementFunction::DcVoltage);
    let mut logger = IncrementalLogger::begin_with(&QuotaOpener::new(6), &path, &columns).unwrap();

    let mut appended = 0;
    let mut failure = None;
    for i in 1..=10 {
        match logger.append(&sample(i, 4.986563752131843)) {
            Ok(()) => appended += 1,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    drop(logger);

    assert_eq!(appended, 5);
    assert!(matches!(failure, Some(DmmError::Write { .. })));
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.ends_with('\n'));
    let contents = read_log(&path).unwrap();
    assert_eq!(contents.indices(), vec![1, 2, 3, 4, 5]);
    assert!(contents.rows.iter().all(|row| row.value == 4.986563752131843));
}

#[test]
fn sequential_runs_never_overwrite() {
    let dir = tempdir().unwrap();
    let policy = FilenamePolicy::new("Messung", SuffixPolicy::Sequential);

    let mut paths = Vec::new();
    for run in 1..=3u64 {
        let path = policy.resolve(dir.path(), Local::now());
        let mut logger = begin(&path);
        logger.append(&sample(1, run as f64)).unwrap();
        drop(logger);
        paths.push(path);
    }

    assert_eq!(
        paths,
        vec![
            dir.path().join("Messung_001.csv"),
            dir.path().join("Messung_002.csv"),
            dir.path().join("Messung_003.csv"),
        ]
    );
    for (i, path) in paths.iter().enumerate() {
        let contents = read_log(path).unwrap();
        assert_eq!(contents.rows[0].value, (i + 1) as f64);
    }
}

#[test]
fn timestamp_policy_skips_existing_chart_names() {
    let dir = tempdir().unwrap();
    let policy = FilenamePolicy::new("Messung", SuffixPolicy::Timestamp);
    let now = Local::now();

    let first = policy.resolve(dir.path(), now);
    fs::write(chart_path_for(&first), "<svg/>").unwrap();
    let second = policy.resolve(dir.path(), now);

    assert_ne!(first, second);
    assert!(second
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with("_2")));
}
