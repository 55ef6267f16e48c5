//! CLI entry point for dmm_logger
//!
//! Headless front-end for the acquisition loop:
//! - `run` logs until Ctrl-C or a sample limit, then finalizes the log
//! - `scan` lists the instrument addresses that can be selected
//! - `settings` shows where the settings live and what they contain
//!
//! # Usage
//!
//! ```bash
//! dmm_logger run --samples 20 --interval-ms 200
//! dmm_logger run --address GPIB0::22::INSTR --no-chart
//! dmm_logger scan
//! dmm_logger --settings ./bench.toml settings
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dmm_logger::acquisition::{Acquisition, AcquisitionConfig, RunReport};
use dmm_logger::config::{FileSettingsStore, Settings, SettingsManager};
use dmm_logger::instrument::{DefaultOpener, ResourceAddress};
use dmm_logger::logging::{self, TracingConfig};
use dmm_logger::measurement::Sample;
use dmm_logger::plot::PlotBuffer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dmm_logger")]
#[command(about = "Crash-safe logging for 34401A bench multimeters", long_about = None)]
struct Cli {
    /// Settings file (default: dmm_logger.toml beside the executable)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log readings until Ctrl-C or the sample limit
    Run(RunArgs),

    /// List SIMULATION and the VISA resources that can be found
    Scan,

    /// Print the settings file path and the active settings
    Settings,
}

#[derive(Args)]
struct RunArgs {
    /// VISA resource or SIMULATION; remembered for the next start
    #[arg(long)]
    address: Option<String>,

    /// Polling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop after this many samples
    #[arg(long)]
    samples: Option<u64>,

    /// Seed for simulated readings
    #[arg(long)]
    seed: Option<u64>,

    /// Directory for the log and chart
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Skip the statistics block
    #[arg(long)]
    no_statistics: bool,

    /// Skip the chart
    #[arg(long)]
    no_chart: bool,

    /// Print samples and the report as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let store = match &cli.settings {
        Some(path) => FileSettingsStore::new(path),
        None => FileSettingsStore::beside_executable()?,
    };
    let loaded = store.try_load();
    let level_source = loaded.as_ref().ok().cloned().unwrap_or_default();
    logging::init(TracingConfig::from_settings(&level_source)?)?;

    let settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            warn!(path = %store.path().display(), error = %e, "Unusable settings, using defaults");
            Settings::default()
        }
    };
    let mut manager = SettingsManager::with_settings(store, settings);

    match cli.command {
        Commands::Run(args) => run(&mut manager, args).await,
        Commands::Scan => scan(&manager).await,
        Commands::Settings => show_settings(&manager),
    }
}

async fn run(manager: &mut SettingsManager<FileSettingsStore>, args: RunArgs) -> Result<()> {
    if let Some(address) = args.address.clone() {
        manager
            .update(|s| s.address = address)
            .context("Invalid address")?;
    }

    let mut settings = manager.settings().clone();
    if let Some(interval) = args.interval_ms {
        settings.interval_ms = interval;
    }
    if let Some(dir) = args.output_dir {
        settings.output_dir = dir;
    }
    if args.seed.is_some() {
        settings.simulation_seed = args.seed;
    }
    settings.include_statistics &= !args.no_statistics;
    settings.include_chart &= !args.no_chart;

    let config = AcquisitionConfig::from_settings(&settings).context("Invalid settings")?;
    let opener = Arc::new(DefaultOpener::new(config.query_timeout));
    let plot = PlotBuffer::from_settings(&settings);
    let mut acquisition = Acquisition::new(config, opener).with_plot_sink(plot.clone());

    let path = acquisition.start().await?;
    info!(path = %path.display(), status = ?acquisition.status(), "Logging, press Ctrl-C to stop");

    let mut task = acquisition.spawn(args.samples);
    let mut feed = task.subscribe();

    let outcome = loop {
        let mut stop_requested = false;
        tokio::select! {
            outcome = task.wait() => break outcome?,
            _ = tokio::signal::ctrl_c() => stop_requested = true,
            received = feed.recv() => match received {
                Ok(sample) => print_sample(&sample, &plot, args.json)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Output fell behind"),
                Err(RecvError::Closed) => {}
            },
        }
        if stop_requested {
            info!("Stop requested, finishing current sample");
            task.request_stop();
        }
    };
    while let Ok(sample) = feed.try_recv() {
        print_sample(&sample, &plot, args.json)?;
    }

    let report = outcome.result?;
    print_report(&report, args.json)?;

    outcome.acquisition.shutdown().await?;
    if let Err(e) = manager.save() {
        warn!(error = %e, "Settings could not be saved");
    }
    Ok(())
}

/// One line per sample. The text form adds the spread of the live window.
fn print_sample(sample: &Sample, plot: &PlotBuffer, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(sample)?);
        return Ok(());
    }
    match plot.statistics() {
        Some(window) => println!(
            "{:>6}  {:>10.4} s  {} {}  (last {}: mean {:.6}, p-p {:.6})",
            sample.index,
            sample.elapsed_seconds,
            sample.value,
            sample.unit,
            window.count,
            window.mean,
            window.peak_to_peak()
        ),
        None => println!(
            "{:>6}  {:>10.4} s  {} {}",
            sample.index, sample.elapsed_seconds, sample.value, sample.unit
        ),
    }
    Ok(())
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let summary = serde_json::json!({
            "path": report.path(),
            "samples": report.run.len(),
            "statistics": report.statistics,
            "chart": report.chart_path,
            "degraded": report.degraded,
            "status": report.status,
        });
        println!("{}", summary);
        return Ok(());
    }

    println!();
    println!("Log:      {}", report.path().display());
    println!("Samples:  {}", report.run.len());
    if let Some(stats) = &report.statistics {
        let unit = report.run.function().unit();
        println!("Mean:     {} {}", stats.mean, unit);
        println!("Std Dev:  {} {}", stats.std_dev, unit);
        println!("Min/Max:  {} / {} {}", stats.min, stats.max, unit);
    }
    if let Some(chart) = &report.chart_path {
        println!("Chart:    {}", chart.display());
    }
    if report.degraded {
        println!("Note:     some readings were simulated ({:?})", report.status);
    }
    Ok(())
}

async fn scan(manager: &SettingsManager<FileSettingsStore>) -> Result<()> {
    let opener = DefaultOpener::new(manager.settings().query_timeout());
    let resources = opener.list_resources().await;

    println!("{}", ResourceAddress::SIMULATION);
    for resource in &resources {
        println!("{}", resource);
    }
    if resources.is_empty() {
        info!("No instruments found, simulation available");
    } else {
        info!(count = resources.len(), "Instruments found");
    }
    Ok(())
}

fn show_settings(manager: &SettingsManager<FileSettingsStore>) -> Result<()> {
    println!("# {}", manager.store().path().display());
    print!("{}", toml::to_string_pretty(manager.settings())?);
    Ok(())
}
