//! End-to-end runs through the acquisition loop.

use dmm_logger::acquisition::{Acquisition, AcquisitionConfig, AcquisitionState, ConnectionStatus};
use dmm_logger::error::SessionErrorKind;
use dmm_logger::instrument::{
    FailureScenario, ResourceAddress, ScriptedOpener, ScriptedSession, SimulationSource,
};
use dmm_logger::measurement::ExportOptions;
use dmm_logger::plot::PlotBuffer;
use dmm_logger::storage::{chart_path_for, read_log, FilenamePolicy, SuffixPolicy};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tracing_test::traced_test;

const GPIB: &str = "GPIB0::22::INSTR";

fn config(dir: &Path, statistics: bool, chart: bool) -> AcquisitionConfig {
    AcquisitionConfig {
        output_dir: dir.to_path_buf(),
        filename: FilenamePolicy::new("run", SuffixPolicy::Sequential),
        interval: Duration::from_millis(20),
        query_timeout: Duration::from_millis(20),
        export: ExportOptions {
            include_statistics: statistics,
            include_chart: chart,
        },
        ..AcquisitionConfig::default()
    }
}

#[tokio::test]
async fn replayed_values_produce_three_rows_and_statistics() {
    let dir = tempdir().unwrap();
    let mut acquisition = Acquisition::new(
        config(dir.path(), true, false),
        Arc::new(ScriptedOpener::refusing(SessionErrorKind::Unavailable)),
    )
    .with_simulation(SimulationSource::replay(vec![1.23, 1.25, 1.24]));

    acquisition.start().await.unwrap();
    let outcome = acquisition.spawn(Some(3)).join().await.unwrap();
    let report = outcome.result.unwrap();

    let contents = read_log(report.path()).unwrap();
    assert_eq!(contents.indices(), vec![1, 2, 3]);
    let values: Vec<f64> = contents.rows.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![1.23, 1.25, 1.24]);

    assert_eq!(contents.statistic("Mean"), Some(1.24));
    assert_eq!(contents.statistic("Minimum"), Some(1.23));
    assert_eq!(contents.statistic("Maximum"), Some(1.25));
    assert_eq!(contents.metadata_value("Points"), Some("3"));
    assert!(!chart_path_for(report.path()).exists());
    assert!(!report.degraded);
    assert_eq!(outcome.acquisition.state(), AcquisitionState::Stopped);
}

#[tokio::test]
async fn timeout_on_second_poll_keeps_all_five_rows() {
    let dir = tempdir().unwrap();
    let session = ScriptedSession::new(GPIB, vec![5.0]).with_scenario(FailureScenario::TimeoutOnRead(2));
    let log = session.command_log();
    let mut cfg = config(dir.path(), true, false);
    cfg.address = ResourceAddress::parse(GPIB).unwrap();

    let mut acquisition = Acquisition::new(cfg, Arc::new(ScriptedOpener::new(session)))
        .with_simulation(SimulationSource::replay(vec![-1.0]));
    acquisition.start().await.unwrap();
    assert!(matches!(acquisition.status(), ConnectionStatus::Connected { .. }));

    let outcome = acquisition.spawn(Some(5)).join().await.unwrap();
    let report = outcome.result.unwrap();

    let contents = read_log(report.path()).unwrap();
    assert_eq!(contents.indices(), vec![1, 2, 3, 4, 5]);
    let values: Vec<f64> = contents.rows.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![5.0, -1.0, -1.0, -1.0, -1.0]);
    assert!(report.degraded);
    assert!(report.status.is_degraded());
    // The hung read was the last one sent to the meter.
    assert_eq!(log.reads(), 2);
}

#[tokio::test]
#[traced_test]
async fn degrade_is_logged() {
    let dir = tempdir().unwrap();
    let session = ScriptedSession::new(GPIB, vec![5.0])
        .with_scenario(FailureScenario::CommunicationLossAfter(1));
    let mut cfg = config(dir.path(), false, false);
    cfg.address = ResourceAddress::parse(GPIB).unwrap();

    let mut acquisition = Acquisition::new(cfg, Arc::new(ScriptedOpener::new(session)));
    acquisition.start().await.unwrap();
    acquisition.poll_once().await.unwrap();
    let second = acquisition.poll_once().await.unwrap();
    acquisition.stop().unwrap();

    assert_eq!(second.index, 2);
    assert!(logs_contain("continuing with simulated readings"));
}

#[tokio::test]
#[traced_test]
async fn unreachable_instrument_logs_and_simulates() {
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path(), false, false);
    cfg.address = ResourceAddress::parse("ASRL1::INSTR").unwrap();

    let mut acquisition = Acquisition::new(cfg, Arc::new(ScriptedOpener::refusing(SessionErrorKind::Open)));
    acquisition.start().await.unwrap();
    acquisition.poll_once().await.unwrap();
    let report = acquisition.stop().unwrap();

    assert!(report.degraded);
    assert_eq!(read_log(report.path()).unwrap().rows.len(), 1);
    assert!(logs_contain("Connection failed"));
}

#[tokio::test]
async fn live_reads_are_prefixes_and_chart_is_written() {
    let dir = tempdir().unwrap();
    let buffer = PlotBuffer::new(100);
    let mut acquisition = Acquisition::new(
        config(dir.path(), true, true),
        Arc::new(ScriptedOpener::refusing(SessionErrorKind::Unavailable)),
    )
    .with_simulation(SimulationSource::replay(vec![1.0, 2.0, 3.0]))
    .with_plot_sink(buffer.clone());

    let path = acquisition.start().await.unwrap();
    let task = acquisition.spawn(None);
    let mut feed = task.subscribe();

    let mut mid_run = Vec::new();
    for _ in 0..3 {
        let sample = feed.recv().await.unwrap();
        let rows = read_log(&path).unwrap().rows;
        assert!(rows.len() as u64 >= sample.index);
        mid_run.push(rows);
    }

    let outcome = task.stop().await.unwrap();
    let report = outcome.result.unwrap();
    let final_rows = read_log(&path).unwrap().rows;

    for rows in &mid_run {
        assert_eq!(rows.as_slice(), &final_rows[..rows.len()]);
    }
    assert_eq!(final_rows.len(), report.run.len());
    assert_eq!(buffer.len(), report.run.len());
    assert_eq!(report.chart_path, Some(chart_path_for(&path)));
    assert!(chart_path_for(&path).exists());
}

#[tokio::test]
async fn acquisition_is_reusable_after_spawned_run() {
    let dir = tempdir().unwrap();
    let mut acquisition = Acquisition::new(
        config(dir.path(), false, false),
        Arc::new(ScriptedOpener::refusing(SessionErrorKind::Unavailable)),
    );

    acquisition.start().await.unwrap();
    let mut acquisition = acquisition.spawn(Some(2)).join().await.unwrap().acquisition;

    let second_path = acquisition.start().await.unwrap();
    acquisition.poll_once().await.unwrap();
    acquisition.stop().unwrap();

    assert_eq!(second_path, dir.path().join("run_002.csv"));
    assert!(dir.path().join("run_001.csv").exists());
    acquisition.shutdown().await.unwrap();
}
