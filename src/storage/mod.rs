//! Persisting runs.
//!
//! - `logger` - the append-only, synced-per-row CSV log
//! - `run` - the in-memory record of one run and its setup
//! - `statistics` - summary block written on finalize
//! - `filename` - output name resolution
//! - `reader` - parsing a log back
//! - `chart` - SVG line chart beside the log
//! - `mock` - storage that fails after a write quota

pub mod chart;
pub mod filename;
pub mod logger;
pub mod mock;
pub mod reader;
pub mod run;
pub mod statistics;

pub use filename::{chart_path_for, FilenamePolicy, SuffixPolicy};
pub use logger::{FileLogOpener, FinalizeReport, IncrementalLogger, LogColumns, LogOpener, LogStorage};
pub use mock::QuotaOpener;
pub use reader::{read_log, LogContents, LoggedRow};
pub use run::{Run, RunSetup};
pub use statistics::Statistics;
