//! Summary statistics over the values of a run.

use serde::{Deserialize, Serialize};

/// Mean, spread and extremes of a set of readings.
///
/// The standard deviation is the population deviation (divides by `n`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Number of finite values the statistics cover.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
}

impl Statistics {
    /// Compute statistics over the finite values; `None` if there are none.
    pub fn from_values<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }

        let count = finite.len();
        let mean = finite.iter().sum::<f64>() / count as f64;
        let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            count,
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
        })
    }

    /// Spread between the extremes.
    pub fn peak_to_peak(&self) -> f64 {
        self.max - self.min
    }

    /// Labeled rows in the order they are written below the data.
    pub fn labeled(&self) -> [(&'static str, f64); 5] {
        [
            (MEAN_LABEL, self.mean),
            (STD_DEV_LABEL, self.std_dev),
            (MIN_LABEL, self.min),
            (MAX_LABEL, self.max),
            (PEAK_TO_PEAK_LABEL, self.peak_to_peak()),
        ]
    }
}

/// Significant digits of the values in the statistics block.
pub const SIGNIFICANT_DIGITS: usize = 9;

/// Title row of the statistics block.
pub const STATISTICS_TITLE: &str = "Statistics";
/// Label of the sample count row.
pub const COUNT_LABEL: &str = "Samples";
/// Label of the mean row.
pub const MEAN_LABEL: &str = "Mean";
/// Label of the standard deviation row.
pub const STD_DEV_LABEL: &str = "Std Dev";
/// Label of the minimum row.
pub const MIN_LABEL: &str = "Minimum";
/// Label of the maximum row.
pub const MAX_LABEL: &str = "Maximum";
/// Label of the peak-to-peak row.
pub const PEAK_TO_PEAK_LABEL: &str = "Peak-to-Peak";

/// Round `value` to `digits` significant digits and print the shortest form.
///
/// `1.2400000000000002` becomes `1.24`. Non-finite values print as is.
pub fn format_significant(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let precision = digits.max(1) - 1;
    format!("{:.*e}", precision, value)
        .parse::<f64>()
        .unwrap_or(value)
        .to_string()
}
