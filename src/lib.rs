//! # DMM Logger
//!
//! Crash-safe measurement logging for HP/Agilent 34401A bench multimeters.
//!
//! A run polls the meter on a fixed interval and appends every reading to a CSV
//! log that is synced to disk row by row, so the file is complete up to the last
//! sample even if the process dies. When a run stops, a statistics block and a
//! line chart can be added. Without a reachable meter, readings come from a
//! simulation source and logging carries on.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The `Idle -> Running -> Stopped` state machine, the timed
//!   polling task and the degrade-to-simulation policy.
//! - **`config`**: `Settings`, their validation and the TOML settings store.
//! - **`error`**: `DmmError` and the structured `SessionError`.
//! - **`instrument`**: Resource addresses, the session traits, the 34401A driver,
//!   the simulation source and scripted sessions for tests.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`measurement`**: Measurement functions, ranges, resolutions and `Sample`.
//! - **`plot`**: The plot sink and the bounded live plot buffer.
//! - **`storage`**: The incremental CSV logger, statistics, file naming, log
//!   read-back and chart rendering.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod measurement;
pub mod plot;
pub mod storage;

pub use acquisition::{Acquisition, AcquisitionConfig, AcquisitionState, ConnectionStatus, RunReport};
pub use config::{FileSettingsStore, Settings, SettingsManager, SettingsStore};
pub use error::{AppResult, DmmError, SessionError, SessionErrorKind};
pub use measurement::{ExportOptions, MeasurementFunction, Sample};
