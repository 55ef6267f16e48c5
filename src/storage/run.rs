//! One logging session from start to stop.

use crate::error::{AppResult, DmmError};
use crate::measurement::{ExportOptions, MeasurementFunction, MeasurementRange, Resolution, Sample};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Title row of the run metadata block.
pub const METADATA_TITLE: &str = "Run";

const CLOCK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How the meter was set up for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSetup {
    /// Measured function.
    pub function: MeasurementFunction,
    /// Configured range.
    pub range: MeasurementRange,
    /// Configured resolution.
    pub resolution: Resolution,
    /// Polling interval.
    pub interval: Duration,
}

impl RunSetup {
    /// Autorange at the default resolution, polled every `interval`.
    pub fn new(function: MeasurementFunction, interval: Duration) -> Self {
        Self {
            function,
            range: MeasurementRange::Auto,
            resolution: Resolution::default(),
            interval,
        }
    }

    /// Use a fixed or explicit range.
    pub fn with_range(mut self, range: MeasurementRange) -> Self {
        self.range = range;
        self
    }

    /// Use another resolution.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }
}

/// Samples of one run, its output path and export options.
///
/// The path is fixed when the run is created. After [`Run::finish`] the run is
/// read-only and [`Run::record`] refuses further samples.
#[derive(Debug, Clone)]
pub struct Run {
    path: PathBuf,
    setup: RunSetup,
    options: ExportOptions,
    samples: Vec<Sample>,
    started_at: DateTime<Local>,
    finished_at: Option<DateTime<Local>>,
}

impl Run {
    /// Start an empty run; `started_at` is now.
    pub fn new(path: PathBuf, setup: RunSetup, options: ExportOptions) -> Self {
        Self {
            path,
            setup,
            options,
            samples: Vec::new(),
            started_at: Local::now(),
            finished_at: None,
        }
    }

    /// Log file of this run.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How the meter was set up.
    pub fn setup(&self) -> &RunSetup {
        &self.setup
    }

    /// Measured function.
    pub fn function(&self) -> MeasurementFunction {
        self.setup.function
    }

    /// What `finalize` adds below the data rows.
    pub fn options(&self) -> ExportOptions {
        self.options
    }

    /// Recorded samples in index order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Readings in index order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }

    /// Number of recorded samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// When the run was created.
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Set by [`Run::finish`].
    pub fn finished_at(&self) -> Option<DateTime<Local>> {
        self.finished_at
    }

    /// Whether the run is frozen.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Labeled rows describing the run, in the order they are logged.
    pub fn metadata(&self) -> Vec<(&'static str, String)> {
        let setup = &self.setup;
        let unit = setup.function.unit();
        let mut rows = vec![(
            "Started",
            self.started_at.format(CLOCK_FORMAT).to_string(),
        )];
        if let Some(finished) = self.finished_at {
            rows.push(("Stopped", finished.format(CLOCK_FORMAT).to_string()));
        }
        rows.push(("Function", setup.function.label().to_string()));
        rows.push(("Range", setup.range.describe(unit)));
        rows.push(("Resolution", setup.resolution.label().to_string()));
        if setup.function.supports_nplc() {
            rows.push(("NPLC", setup.resolution.nplc().to_string()));
        }
        rows.push(("Interval (ms)", setup.interval.as_millis().to_string()));
        rows.push(("Points", self.samples.len().to_string()));
        rows
    }

    /// Index the next sample must carry.
    pub fn next_index(&self) -> u64 {
        self.samples.len() as u64 + 1
    }

    /// Add a sample; its index must be exactly [`Run::next_index`].
    pub fn record(&mut self, sample: Sample) -> AppResult<()> {
        if self.is_finished() {
            return Err(DmmError::RunFinished {
                path: self.path.clone(),
            });
        }
        let expected = self.next_index();
        if sample.index != expected {
            return Err(DmmError::OutOfSequence {
                expected,
                got: sample.index,
            });
        }
        self.samples.push(sample);
        Ok(())
    }

    /// Freeze the run. Idempotent.
    pub fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Local::now());
        }
    }
}
