//! Live plot buffer.
//!
//! The acquisition loop pushes every sample into a [`PlotSink`]. [`PlotBuffer`]
//! is the sink a presentation layer reads from: a bounded window of the most
//! recent points, shared between the loop and any number of readers.

use crate::config::Settings;
use crate::measurement::Sample;
use crate::storage::Statistics;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Receives samples as they are taken.
pub trait PlotSink: Send {
    /// Add the point of one logged sample.
    fn push(&mut self, sample: &Sample);

    /// Forget all points, e.g. when a new run starts.
    fn clear(&mut self);
}

/// One plotted point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotPoint {
    /// Seconds since the run started.
    pub elapsed_seconds: f64,
    /// The reading.
    pub value: f64,
}

#[derive(Debug)]
struct Window {
    points: VecDeque<PlotPoint>,
    capacity: usize,
}

/// Bounded, cloneable view of the most recent samples.
#[derive(Debug, Clone)]
pub struct PlotBuffer {
    inner: Arc<RwLock<Window>>,
}

impl PlotBuffer {
    /// A buffer holding at most `capacity` points (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RwLock::new(Window {
                points: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    /// A buffer bounded by the `max_plot_points` setting.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.max_plot_points)
    }

    fn read(&self) -> RwLockReadGuard<'_, Window> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Window> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Most points the window keeps.
    pub fn capacity(&self) -> usize {
        self.read().capacity
    }

    /// Points currently in the window.
    pub fn len(&self) -> usize {
        self.read().points.len()
    }

    /// Whether the window has no points.
    pub fn is_empty(&self) -> bool {
        self.read().points.is_empty()
    }

    /// Points oldest first.
    pub fn snapshot(&self) -> Vec<PlotPoint> {
        self.read().points.iter().copied().collect()
    }

    /// The most recent point.
    pub fn latest(&self) -> Option<PlotPoint> {
        self.read().points.back().copied()
    }

    /// Statistics over the visible window; needs at least two points.
    pub fn statistics(&self) -> Option<Statistics> {
        let window = self.read();
        if window.points.len() < 2 {
            return None;
        }
        Statistics::from_values(window.points.iter().map(|p| p.value))
    }

    /// Y-axis limits for the visible window.
    pub fn y_bounds(&self) -> Option<(f64, f64)> {
        axis_bounds(self.read().points.iter().map(|p| p.value))
    }
}

impl Default for PlotBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl PlotSink for PlotBuffer {
    fn push(&mut self, sample: &Sample) {
        let mut window = self.write();
        if window.points.len() == window.capacity {
            window.points.pop_front();
        }
        window.points.push_back(PlotPoint {
            elapsed_seconds: sample.elapsed_seconds,
            value: sample.value,
        });
    }

    fn clear(&mut self) {
        self.write().points.clear();
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl PlotSink for NullSink {
    fn push(&mut self, _sample: &Sample) {}

    fn clear(&mut self) {}
}

/// Axis limits with a 5 % margin on each side.
///
/// A flat series gets a margin of 5 % of its magnitude, or ±1 around zero.
pub fn axis_bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;

    let span = max - min;
    let margin = if span > 0.0 {
        span * 0.05
    } else if min != 0.0 {
        min.abs() * 0.05
    } else {
        1.0
    };
    Some((min - margin, max + margin))
}
