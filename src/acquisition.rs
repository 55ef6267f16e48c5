//! Acquisition loop.
//!
//! [`Acquisition`] is an explicit state machine (`Idle -> Running -> Stopped`)
//! that a presentation layer drives with `start` / `stop`. While running, each
//! poll takes one reading, turns it into a [`Sample`] with the next index,
//! appends it to the log and pushes it to the plot sink.
//!
//! Any failed instrument query (timeout, transport error, unparsable or
//! overload response) switches the acquisition to the simulation source for
//! the rest of the session. The failing poll itself is filled with a simulated
//! value, so a run never has a gap. The connection status reports `Degraded`
//! so the user can tell.
//!
//! [`Acquisition::spawn`] runs the timed loop on a tokio task. Stopping is
//! cooperative: the stop signal is only observed between polls, so the last
//! append completes before the log is finalized.

use crate::config::Settings;
use crate::error::{AppResult, DmmError, SessionError};
use crate::instrument::{Multimeter, ResourceAddress, SessionOpener, SimulationSource};
use crate::measurement::{ExportOptions, MeasurementFunction, MeasurementRange, Resolution, Sample};
use crate::plot::{NullSink, PlotSink};
use crate::storage::{
    FileLogOpener, FilenamePolicy, IncrementalLogger, LogColumns, LogOpener, Run, RunSetup,
    Statistics,
};
use chrono::Local;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Capacity of the live sample feed; slow subscribers skip samples.
const SAMPLE_FEED_CAPACITY: usize = 256;

/// Lifecycle of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    /// No run has been started yet.
    Idle,
    /// A run is being logged.
    Running,
    /// The last run ended; `start` begins a new one.
    Stopped,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::Running => "running",
            AcquisitionState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Where readings currently come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// `SIMULATION` was selected.
    Simulation,
    /// A supported meter answered.
    Connected { identity: String },
    /// A real address was selected but readings are simulated.
    Degraded { reason: String },
}

impl ConnectionStatus {
    /// Readings are simulated although a real address was selected.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ConnectionStatus::Degraded { .. })
    }

    /// Readings do not come from a meter.
    pub fn is_simulated(&self) -> bool {
        !matches!(self, ConnectionStatus::Connected { .. })
    }
}

/// Everything the loop needs to know about a run.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Meter to read from, or the simulation sentinel.
    pub address: ResourceAddress,
    /// Function the meter is configured for.
    pub function: MeasurementFunction,
    /// Range sent with `CONF:`.
    pub range: MeasurementRange,
    /// Resolution, sent as NPLC where the function supports it.
    pub resolution: Resolution,
    /// Time between polls.
    pub interval: Duration,
    /// Longest wait for one query before the meter counts as failed.
    pub query_timeout: Duration,
    /// Directory new logs are created in.
    pub output_dir: PathBuf,
    /// How log files are named.
    pub filename: FilenamePolicy,
    /// What finalize adds below the data rows.
    pub export: ExportOptions,
    /// Seed for simulated readings; `None` seeds from the OS.
    pub simulation_seed: Option<u64>,
}

impl AcquisitionConfig {
    /// Validate `settings` and take the acquisition part of them.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        settings.validate()?;
        Ok(Self {
            address: settings.resource_address()?,
            function: settings.function,
            range: settings.measurement_range()?,
            resolution: settings.resolution,
            interval: settings.interval(),
            query_timeout: settings.query_timeout(),
            output_dir: settings.output_dir.clone(),
            filename: settings.filename_policy(),
            export: settings.export_options(),
            simulation_seed: settings.simulation_seed,
        })
    }

    /// Meter setup recorded with each run.
    pub fn run_setup(&self) -> RunSetup {
        RunSetup::new(self.function, self.interval)
            .with_range(self.range)
            .with_resolution(self.resolution)
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            address: ResourceAddress::Simulation,
            function: settings.function,
            range: MeasurementRange::Auto,
            resolution: settings.resolution,
            interval: settings.interval(),
            query_timeout: settings.query_timeout(),
            output_dir: settings.output_dir.clone(),
            filename: settings.filename_policy(),
            export: settings.export_options(),
            simulation_seed: None,
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The frozen run.
    pub run: Run,
    /// Present when requested and the run has samples.
    pub statistics: Option<Statistics>,
    /// The rendered chart, if any.
    pub chart_path: Option<PathBuf>,
    /// Some readings of this run came from the simulation fallback.
    pub degraded: bool,
    /// Connection status when the run stopped.
    pub status: ConnectionStatus,
}

impl RunReport {
    /// Log file of the run.
    pub fn path(&self) -> &std::path::Path {
        self.run.path()
    }
}

struct ActiveRun {
    run: Run,
    logger: IncrementalLogger,
    started: Instant,
    degraded: bool,
}

/// The acquisition state machine.
pub struct Acquisition {
    config: AcquisitionConfig,
    opener: Arc<dyn SessionOpener>,
    log_opener: Arc<dyn LogOpener>,
    meter: Option<Multimeter>,
    simulation: SimulationSource,
    sink: Box<dyn PlotSink>,
    state: AcquisitionState,
    status: ConnectionStatus,
    active: Option<ActiveRun>,
}

impl Acquisition {
    /// An idle acquisition that opens instrument sessions through `opener`.
    pub fn new(config: AcquisitionConfig, opener: Arc<dyn SessionOpener>) -> Self {
        let simulation = SimulationSource::new(config.simulation_seed).with_function(config.function);
        Self {
            config,
            opener,
            log_opener: Arc::new(FileLogOpener),
            meter: None,
            simulation,
            sink: Box::new(NullSink),
            state: AcquisitionState::Idle,
            status: ConnectionStatus::Simulation,
            active: None,
        }
    }

    /// Replace the plot sink.
    pub fn with_plot_sink(mut self, sink: impl PlotSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Create log files through `opener` instead of the file system directly.
    pub fn with_log_opener(mut self, opener: Arc<dyn LogOpener>) -> Self {
        self.log_opener = opener;
        self
    }

    /// Replace the simulation source (e.g. with a replay profile).
    pub fn with_simulation(mut self, source: SimulationSource) -> Self {
        self.simulation = source.with_function(self.config.function);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Where readings currently come from.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Configuration of the next or current run.
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// The run in progress, if any.
    pub fn run(&self) -> Option<&Run> {
        self.active.as_ref().map(|active| &active.run)
    }

    /// Swap the configuration between runs. A changed address drops the session.
    pub fn reconfigure(&mut self, config: AcquisitionConfig) -> AppResult<()> {
        self.require_not_running("reconfigure")?;
        if config.address != self.config.address {
            self.meter = None;
            self.status = ConnectionStatus::Simulation;
        }
        self.simulation.set_function(config.function);
        self.config = config;
        Ok(())
    }

    /// Open (or reuse) the instrument session.
    ///
    /// Never fails: an unreachable or unsupported instrument leaves the
    /// acquisition on simulated readings with a `Degraded` status.
    pub async fn connect(&mut self) -> ConnectionStatus {
        if self.meter.is_some() {
            return self.status.clone();
        }
        if self.config.address.is_simulation() {
            self.status = ConnectionStatus::Simulation;
            return self.status.clone();
        }

        let opened = match self.opener.open(&self.config.address).await {
            Ok(session) => Multimeter::connect(session, self.config.query_timeout).await,
            Err(e) => Err(e),
        };
        match opened {
            Ok(meter) => {
                self.status = ConnectionStatus::Connected {
                    identity: meter.identity().to_string(),
                };
                self.meter = Some(meter);
            }
            Err(e) => {
                warn!(address = %self.config.address, error = %e, "Connection failed, using simulated readings");
                self.status = ConnectionStatus::Degraded {
                    reason: e.to_string(),
                };
            }
        }
        self.status.clone()
    }

    /// Return the meter to local control and forget the session.
    pub async fn disconnect(&mut self) -> AppResult<()> {
        self.require_not_running("disconnect")?;
        self.status = ConnectionStatus::Simulation;
        match self.meter.take() {
            Some(meter) => Ok(meter.disconnect().await?),
            None => Ok(()),
        }
    }

    /// `Idle`/`Stopped` -> `Running`: connect, configure, create the log.
    ///
    /// # Errors
    /// `InvalidState` if already running; `Create` if the log cannot be
    /// created, in which case the state is unchanged.
    pub async fn start(&mut self) -> AppResult<PathBuf> {
        self.require_not_running("start")?;
        self.connect().await;

        let configured = match &self.meter {
            Some(meter) => Some(
                meter
                    .configure(self.config.function, self.config.range, self.config.resolution)
                    .await,
            ),
            None => None,
        };
        if let Some(Err(e)) = configured {
            self.degrade(e);
        }
        self.simulation.set_function(self.config.function);

        let path = self
            .config
            .filename
            .resolve(&self.config.output_dir, Local::now());
        let logger = IncrementalLogger::begin_with(
            self.log_opener.as_ref(),
            &path,
            &LogColumns::for_function(self.config.function),
        )?;

        self.sink.clear();
        self.active = Some(ActiveRun {
            run: Run::new(path.clone(), self.config.run_setup(), self.config.export),
            logger,
            started: Instant::now(),
            degraded: self.status.is_degraded(),
        });
        self.state = AcquisitionState::Running;
        info!(path = %path.display(), source = ?self.status, "Acquisition started");
        Ok(path)
    }

    /// Take one sample.
    ///
    /// # Errors
    /// `InvalidState` unless running. A failed append aborts the run
    /// (state becomes `Stopped`) and is returned; rows already written stay.
    pub async fn poll_once(&mut self) -> AppResult<Sample> {
        if self.state != AcquisitionState::Running {
            return Err(self.invalid_state("poll"));
        }

        let value = self.read_value().await;
        let degraded = self.status.is_degraded();
        let Some(active) = self.active.as_mut() else {
            return Err(self.invalid_state("poll"));
        };

        let sample = Sample {
            index: active.run.next_index(),
            elapsed_seconds: active.started.elapsed().as_secs_f64(),
            value,
            function: self.config.function.label().to_string(),
            unit: self.config.function.unit().to_string(),
            clock: Local::now(),
        };

        if let Err(e) = active.logger.append(&sample) {
            error!(error = %e, index = sample.index, "Write failed, aborting run");
            self.abort();
            return Err(e);
        }
        active.degraded |= degraded;
        active.run.record(sample.clone())?;
        self.sink.push(&sample);
        Ok(sample)
    }

    /// `Running` -> `Stopped`: finalize the log and hand back the frozen run.
    pub fn stop(&mut self) -> AppResult<RunReport> {
        if self.state != AcquisitionState::Running {
            return Err(self.invalid_state("stop"));
        }
        let Some(active) = self.active.take() else {
            return Err(self.invalid_state("stop"));
        };
        self.state = AcquisitionState::Stopped;

        let ActiveRun {
            mut run,
            logger,
            degraded,
            ..
        } = active;
        run.finish();
        let finalized = logger.finalize(&run)?;

        info!(
            path = %run.path().display(),
            samples = run.len(),
            degraded,
            "Acquisition stopped"
        );
        Ok(RunReport {
            run,
            statistics: finalized.statistics,
            chart_path: finalized.chart_path,
            degraded,
            status: self.status.clone(),
        })
    }

    /// Run the timed loop on a tokio task until stopped or `limit` samples are taken.
    pub fn spawn(mut self, limit: Option<u64>) -> AcquisitionTask {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (samples, _) = broadcast::channel(SAMPLE_FEED_CAPACITY);
        let feed = samples.clone();
        let handle = tokio::spawn(async move {
            let result = self.run_until_stopped(stop_rx, feed, limit).await;
            TaskOutcome {
                acquisition: self,
                result,
            }
        });
        AcquisitionTask {
            stop_tx,
            samples,
            handle,
        }
    }

    /// Poll on the configured interval until `stop` flips or `limit` is reached, then stop.
    pub async fn run_until_stopped(
        &mut self,
        mut stop: watch::Receiver<bool>,
        feed: broadcast::Sender<Sample>,
        limit: Option<u64>,
    ) -> AppResult<RunReport> {
        if self.state != AcquisitionState::Running {
            return Err(self.invalid_state("run"));
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let taken = self.run().map_or(0, |run| run.len() as u64);
            if limit.is_some_and(|n| taken >= n) || *stop.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    let sample = self.poll_once().await?;
                    let _ = feed.send(sample);
                }
            }
        }

        self.stop()
    }

    /// Release the session. Use after the last run.
    pub async fn shutdown(mut self) -> AppResult<()> {
        if self.state == AcquisitionState::Running {
            self.stop()?;
        }
        self.disconnect().await
    }

    async fn read_value(&mut self) -> f64 {
        let measured = match &self.meter {
            Some(meter) => Some(meter.measure().await),
            None => None,
        };
        match measured {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                self.degrade(e);
                self.simulation.next_value()
            }
            None => self.simulation.next_value(),
        }
    }

    /// Switch to simulated readings for the rest of the session.
    fn degrade(&mut self, err: SessionError) {
        warn!(
            address = %err.address,
            kind = %err.kind,
            transient = err.is_transient(),
            error = %err.message,
            "Instrument query failed, continuing with simulated readings"
        );
        self.meter = None;
        self.status = ConnectionStatus::Degraded {
            reason: err.to_string(),
        };
    }

    fn abort(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.run.finish();
        }
        self.state = AcquisitionState::Stopped;
    }

    fn require_not_running(&self, operation: &'static str) -> AppResult<()> {
        if self.state == AcquisitionState::Running {
            Err(self.invalid_state(operation))
        } else {
            Ok(())
        }
    }

    fn invalid_state(&self, operation: &'static str) -> DmmError {
        DmmError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

/// What the acquisition task hands back when it ends.
pub struct TaskOutcome {
    /// The acquisition, ready for another `start`.
    pub acquisition: Acquisition,
    /// The finalized run, or why the loop ended early.
    pub result: AppResult<RunReport>,
}

/// Handle to a spawned acquisition loop.
pub struct AcquisitionTask {
    stop_tx: watch::Sender<bool>,
    samples: broadcast::Sender<Sample>,
    handle: JoinHandle<TaskOutcome>,
}

impl AcquisitionTask {
    /// Live feed of samples as they are logged.
    pub fn subscribe(&self) -> broadcast::Receiver<Sample> {
        self.samples.subscribe()
    }

    /// Ask the loop to stop after the current poll.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// The loop has ended and `join` will not wait.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Request a stop and wait for the finalized run.
    pub async fn stop(self) -> AppResult<TaskOutcome> {
        self.request_stop();
        self.join().await
    }

    /// Wait for the loop to end on its own.
    pub async fn join(mut self) -> AppResult<TaskOutcome> {
        self.wait().await
    }

    /// Like [`AcquisitionTask::join`], but usable inside `select!`.
    ///
    /// Must not be awaited again once it has returned.
    pub async fn wait(&mut self) -> AppResult<TaskOutcome> {
        (&mut self.handle)
            .await
            .map_err(|e| DmmError::Task(e.to_string()))
    }
}
