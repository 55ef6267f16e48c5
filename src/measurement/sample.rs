//! A single timestamped measurement.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Clock column format: local wall-clock time with millisecond precision.
pub const CLOCK_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One measurement event.
///
/// Samples are created by the acquisition loop only. `index` starts at 1 and
/// increases by one per sample of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Position in the run, starting at 1.
    pub index: u64,
    /// Seconds since the run started.
    pub elapsed_seconds: f64,
    /// The reading, in `unit`.
    pub value: f64,
    /// Label of the measurement function.
    pub function: String,
    /// Unit of `value`.
    pub unit: String,
    /// Wall-clock time the reading was taken.
    pub clock: DateTime<Local>,
}

impl Sample {
    /// Column label for the value, e.g. `DC Voltage (V)`.
    pub fn value_label(&self) -> String {
        format!("{} ({})", self.function, self.unit)
    }

    /// Clock as written to the log, see [`CLOCK_FORMAT`].
    pub fn clock_text(&self) -> String {
        self.clock.format(CLOCK_FORMAT).to_string()
    }
}

/// What to append when a run is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Append mean, spread and extremes below the data rows.
    pub include_statistics: bool,
    /// Render an SVG line chart next to the log.
    pub include_chart: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_statistics: true,
            include_chart: true,
        }
    }
}
