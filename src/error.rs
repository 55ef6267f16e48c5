//! Custom error types for the application.
//!
//! This module defines the primary error type, `DmmError`, for the whole crate.
//! Using the `thiserror` crate, it gives a single, consistent way to report
//! everything that can go wrong while logging a run, from a log file that cannot
//! be created to an instrument that stops answering.
//!
//! ## Error Hierarchy
//!
//! - **`Create`** / **`Write`**: The log file could not be created, or a row could not
//!   be written and synced. `Create` is fatal to starting a run, `Write` is fatal to
//!   the active run. Rows that were already synced stay valid in both cases.
//! - **`Chart`**: Rendering the chart page failed during finalization.
//! - **`Settings`** / **`SettingsSave`**: The settings file could not be parsed or
//!   serialized. Loading never surfaces these to the user (defaults are used), but
//!   saving does.
//! - **`Configuration`**: Values that parse but are semantically invalid.
//! - **`Session`**: Instrument transport failures, see [`SessionError`]. During a run
//!   these are absorbed by the degrade-to-simulation policy.
//! - **`InvalidState`**: A start/stop/poll was requested in the wrong acquisition state.
//! - **`OutOfSequence`** / **`RunFinished`**: A sample was recorded with a gap in its
//!   index, or after the run was frozen. These are programming errors.
//!
//! By using `#[from]`, `DmmError` can be created from the underlying error types,
//! keeping call sites short with the `?` operator.

use crate::acquisition::AcquisitionState;
use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Session Errors
// =============================================================================

/// Category of an instrument session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// The resource could not be opened.
    Open,
    /// A query did not complete within the session timeout.
    Timeout,
    /// The transport failed while sending or receiving.
    Communication,
    /// The instrument answered with something that is not a reading.
    InvalidResponse,
    /// The identity string does not belong to a supported multimeter.
    UnsupportedInstrument,
    /// The transport for this address was not compiled in.
    Unavailable,
}

impl std::fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionErrorKind::Open => "open",
            SessionErrorKind::Timeout => "timeout",
            SessionErrorKind::Communication => "communication",
            SessionErrorKind::InvalidResponse => "invalid_response",
            SessionErrorKind::UnsupportedInstrument => "unsupported_instrument",
            SessionErrorKind::Unavailable => "unavailable",
        };
        write!(f, "{}", label)
    }
}

/// Structured instrument session error.
#[derive(Error, Debug, Clone)]
#[error("Session '{address}' {kind} error: {message}")]
pub struct SessionError {
    /// Resource the session was opened for.
    pub address: String,
    /// What kind of failure it was.
    pub kind: SessionErrorKind,
    /// What the transport or the meter reported.
    pub message: String,
}

impl SessionError {
    /// Error for `address` with a free-form message.
    pub fn new(
        address: impl Into<String>,
        kind: SessionErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            kind,
            message: message.into(),
        }
    }

    /// Timeouts are transient; everything else points at the address or the wiring.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            SessionErrorKind::Timeout | SessionErrorKind::InvalidResponse
        )
    }
}

// =============================================================================
// Application Errors
// =============================================================================

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DmmError>;

/// Primary error type for the logger.
#[derive(Error, Debug)]
pub enum DmmError {
    /// File system error outside a log write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The log file could not be created.
    #[error("Cannot create log file '{}': {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A row or block could not be written and synced.
    #[error("Writing to log file '{}' failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A log file could not be parsed back.
    #[error("Reading log file '{}' failed: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// The chart could not be rendered.
    #[error("Chart rendering failed: {0}")]
    Chart(String),

    /// The settings sources could not be merged.
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// The settings could not be serialized.
    #[error("Settings serialization error: {0}")]
    SettingsSave(#[from] toml::ser::Error),

    /// A setting has a value the logger cannot use.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Instrument transport failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Operation not allowed in the current acquisition state.
    #[error("Cannot {operation} while acquisition is {state}")]
    InvalidState {
        operation: &'static str,
        state: AcquisitionState,
    },

    /// A sample skipped or repeated an index.
    #[error("Sample {got} out of sequence, expected index {expected}")]
    OutOfSequence { expected: u64, got: u64 },

    /// A sample was recorded after the run was frozen.
    #[error("Run '{}' is finished and cannot take more samples", path.display())]
    RunFinished { path: PathBuf },

    /// The acquisition task panicked or was cancelled.
    #[error("Acquisition task failed: {0}")]
    Task(String),
}

impl From<figment::Error> for DmmError {
    fn from(value: figment::Error) -> Self {
        DmmError::Settings(Box::new(value))
    }
}

impl DmmError {
    /// Whether this error ended the active run (as opposed to being absorbed).
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, DmmError::Create { .. } | DmmError::Write { .. })
    }
}
