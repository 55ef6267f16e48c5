//! Output file naming.
//!
//! A run's file name is resolved once, when the run starts, from a prefix and a
//! suffix policy. A candidate counts as taken when either the log or its chart
//! file already exists, so a new run never overwrites an earlier one.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extension of log files.
pub const LOG_EXTENSION: &str = "csv";
/// Extension of the chart beside a log.
pub const CHART_EXTENSION: &str = "svg";

/// How the part after the prefix is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuffixPolicy {
    /// `prefix_YYYYmmdd_HHMMSS.csv`, with `_2`, `_3`, ... on collision.
    Timestamp,
    /// `prefix_001.csv`, `prefix_002.csv`, ... first free counter wins.
    Sequential,
}

impl Default for SuffixPolicy {
    fn default() -> Self {
        SuffixPolicy::Timestamp
    }
}

/// Prefix plus suffix policy for new log names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePolicy {
    /// Start of the name, e.g. `Messung`.
    pub prefix: String,
    /// How the rest of the name is chosen.
    pub suffix: SuffixPolicy,
}

impl FilenamePolicy {
    /// Policy naming logs `prefix_<suffix>.csv`.
    pub fn new(prefix: impl Into<String>, suffix: SuffixPolicy) -> Self {
        Self {
            prefix: prefix.into(),
            suffix,
        }
    }

    /// Pick a free log path in `dir`.
    pub fn resolve(&self, dir: &Path, now: DateTime<Local>) -> PathBuf {
        match self.suffix {
            SuffixPolicy::Sequential => (1u64..)
                .map(|n| log_path(dir, &format!("{}_{:03}", self.prefix, n)))
                .find(|candidate| !is_taken(candidate))
                .unwrap_or_else(|| self.timestamped(dir, now)),
            SuffixPolicy::Timestamp => self.timestamped(dir, now),
        }
    }

    fn timestamped(&self, dir: &Path, now: DateTime<Local>) -> PathBuf {
        let base = format!("{}_{}", self.prefix, now.format("%Y%m%d_%H%M%S"));
        let first = log_path(dir, &base);
        if !is_taken(&first) {
            return first;
        }
        (2u64..)
            .map(|n| log_path(dir, &format!("{}_{}", base, n)))
            .find(|candidate| !is_taken(candidate))
            .unwrap_or(first)
    }
}

/// Chart file written next to a log.
pub fn chart_path_for(log_path: &Path) -> PathBuf {
    log_path.with_extension(CHART_EXTENSION)
}

fn log_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}.{}", stem, LOG_EXTENSION))
}

fn is_taken(candidate: &Path) -> bool {
    candidate.exists() || chart_path_for(candidate).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::tempdir;

    fn fixed_now() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 17, 9, 3, 7)
            .single()
            .unwrap()
    }

    #[test]
    fn timestamp_name() {
        let dir = tempdir().unwrap();
        let policy = FilenamePolicy::new("Messung", SuffixPolicy::Timestamp);
        let path = policy.resolve(dir.path(), fixed_now());
        assert_eq!(path, dir.path().join("Messung_20240517_090307.csv"));
    }

    #[test]
    fn timestamp_collision_gets_counter() {
        let dir = tempdir().unwrap();
        let policy = FilenamePolicy::new("Messung", SuffixPolicy::Timestamp);
        fs::write(dir.path().join("Messung_20240517_090307.csv"), "").unwrap();
        fs::write(dir.path().join("Messung_20240517_090307_2.svg"), "").unwrap();

        let path = policy.resolve(dir.path(), fixed_now());
        assert_eq!(path, dir.path().join("Messung_20240517_090307_3.csv"));
    }

    #[test]
    fn sequential_skips_taken_names() {
        let dir = tempdir().unwrap();
        let policy = FilenamePolicy::new("run", SuffixPolicy::Sequential);
        assert_eq!(
            policy.resolve(dir.path(), fixed_now()),
            dir.path().join("run_001.csv")
        );

        fs::write(dir.path().join("run_001.csv"), "").unwrap();
        fs::write(dir.path().join("run_002.svg"), "").unwrap();
        assert_eq!(
            policy.resolve(dir.path(), fixed_now()),
            dir.path().join("run_003.csv")
        );
    }

    #[test]
    fn chart_sits_beside_log() {
        assert_eq!(
            chart_path_for(Path::new("/data/run_001.csv")),
            PathBuf::from("/data/run_001.svg")
        );
    }
}
