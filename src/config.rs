//! Settings store.
//!
//! Settings are a flat TOML document that lives beside the executable
//! (`dmm_logger.toml`). They are loaded once at startup and layered with
//! figment:
//! 1. built-in defaults
//! 2. the settings file, if present
//! 3. environment variables prefixed with `DMM_LOGGER_`
//!    (e.g. `DMM_LOGGER_INTERVAL_MS=250`)
//!
//! Loading never fails: a corrupt or invalid file is reported with a warning
//! and the defaults are used instead. Saving is explicit and goes through
//! [`SettingsManager::update`], which validates before it writes.
//!
//! # Example
//! ```no_run
//! use dmm_logger::config::{FileSettingsStore, SettingsManager};
//!
//! let store = FileSettingsStore::beside_executable()?;
//! let mut manager = SettingsManager::new(store);
//! manager.update(|s| s.interval_ms = 250)?;
//! # Ok::<(), dmm_logger::error::DmmError>(())
//! ```

use crate::error::{AppResult, DmmError};
use crate::instrument::ResourceAddress;
use crate::logging::parse_log_level;
use crate::measurement::{ExportOptions, MeasurementFunction, MeasurementRange, Resolution};
use crate::storage::{FilenamePolicy, SuffixPolicy};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name of the settings document.
pub const SETTINGS_FILE_NAME: &str = "dmm_logger.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "DMM_LOGGER_";

/// Shortest polling interval the meter keeps up with.
pub const MIN_INTERVAL_MS: u64 = 50;

/// User interface language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// German
    De,
    /// English
    En,
}

impl Default for Language {
    fn default() -> Self {
        Language::De
    }
}

/// Color scheme of a graphical front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    /// Dark background.
    Dark,
    /// Light background.
    Light,
}

impl Default for Theme {
    fn default() -> Self {
        Theme::Dark
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Last used resource address, or `SIMULATION`.
    pub address: String,
    /// Language of a graphical front-end.
    pub language: Language,
    /// Color scheme of a graphical front-end.
    pub theme: Theme,
    /// Level for the tracing subscriber (trace, debug, info, warn, error).
    pub log_level: String,
    /// Directory new logs are written to.
    pub output_dir: PathBuf,
    /// Start of every log file name.
    pub filename_prefix: String,
    /// How the rest of the file name is chosen.
    pub filename_suffix: SuffixPolicy,
    /// Append the statistics block on stop.
    pub include_statistics: bool,
    /// Render the chart on stop.
    pub include_chart: bool,
    /// Polling period in milliseconds.
    pub interval_ms: u64,
    /// Measurement function of the next run.
    pub function: MeasurementFunction,
    /// Range as shown on the front panel, e.g. `AUTO` or `10 V`.
    pub range: String,
    /// Display resolution of the next run.
    pub resolution: Resolution,
    /// Points kept in the live plot.
    pub max_plot_points: usize,
    /// Timeout for a single instrument query.
    pub query_timeout_ms: u64,
    /// Fixed seed for simulated readings; random if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation_seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address: ResourceAddress::SIMULATION.to_string(),
            language: Language::default(),
            theme: Theme::default(),
            log_level: "info".to_string(),
            output_dir: PathBuf::from("."),
            filename_prefix: "Messung".to_string(),
            filename_suffix: SuffixPolicy::default(),
            include_statistics: true,
            include_chart: true,
            interval_ms: 500,
            function: MeasurementFunction::default(),
            range: "AUTO".to_string(),
            resolution: Resolution::default(),
            max_plot_points: 1000,
            query_timeout_ms: 5000,
            simulation_seed: None,
        }
    }
}

impl Settings {
    /// Check values that deserialize but make no sense.
    pub fn validate(&self) -> AppResult<()> {
        if self.interval_ms < MIN_INTERVAL_MS {
            return Err(DmmError::Configuration(format!(
                "interval_ms must be at least {} (got {})",
                MIN_INTERVAL_MS, self.interval_ms
            )));
        }

        let prefix = self.filename_prefix.trim();
        if prefix.is_empty() {
            return Err(DmmError::Configuration(
                "filename_prefix must not be empty".to_string(),
            ));
        }
        if prefix.contains(['/', '\\']) {
            return Err(DmmError::Configuration(format!(
                "filename_prefix '{}' must not contain path separators",
                prefix
            )));
        }

        parse_log_level(&self.log_level)?;
        self.measurement_range()?;
        self.resource_address()?;

        if self.max_plot_points < 2 {
            return Err(DmmError::Configuration(format!(
                "max_plot_points must be at least 2 (got {})",
                self.max_plot_points
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(DmmError::Configuration(
                "query_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The parsed `address`.
    pub fn resource_address(&self) -> AppResult<ResourceAddress> {
        Ok(ResourceAddress::parse(&self.address)?)
    }

    /// The configured range, which must be one the function offers.
    pub fn measurement_range(&self) -> AppResult<MeasurementRange> {
        let range = MeasurementRange::parse(&self.range)?;
        let offered = self
            .function
            .ranges()
            .iter()
            .any(|candidate| MeasurementRange::parse(candidate).ok() == Some(range));
        if range == MeasurementRange::Auto || offered {
            Ok(range)
        } else {
            Err(DmmError::Configuration(format!(
                "range '{}' is not available for {}",
                self.range, self.function
            )))
        }
    }

    /// What finalize adds to a log.
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            include_statistics: self.include_statistics,
            include_chart: self.include_chart,
        }
    }

    /// Naming policy from prefix and suffix.
    pub fn filename_policy(&self) -> FilenamePolicy {
        FilenamePolicy::new(self.filename_prefix.trim(), self.filename_suffix)
    }

    /// `interval_ms` as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// `query_timeout_ms` as a duration.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Load/save collaborator for [`Settings`].
pub trait SettingsStore {
    /// Current settings; defaults if nothing usable is stored.
    fn load(&self) -> Settings;

    /// Persist `settings`, replacing what was stored.
    fn save(&self, settings: &Settings) -> AppResult<()>;
}

/// Settings in a TOML file.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    /// A store backed by the TOML file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `dmm_logger.toml` in the directory of the running executable.
    pub fn beside_executable() -> AppResult<Self> {
        let exe = std::env::current_exe()?;
        let dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::new(dir.join(SETTINGS_FILE_NAME)))
    }

    /// The settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate, reporting what went wrong.
    pub fn try_load(&self) -> AppResult<Settings> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(&self.path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Settings {
        match self.try_load() {
            Ok(settings) => {
                debug!(path = %self.path.display(), "Settings loaded");
                settings
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unusable settings, using defaults");
                Settings::default()
            }
        }
    }

    fn save(&self, settings: &Settings) -> AppResult<()> {
        let text = toml::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        info!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

/// In-memory settings plus the store they came from.
#[derive(Debug)]
pub struct SettingsManager<S> {
    store: S,
    current: Settings,
}

impl<S: SettingsStore> SettingsManager<S> {
    /// Load from `store`.
    pub fn new(store: S) -> Self {
        let current = store.load();
        Self { store, current }
    }

    /// Wrap settings that were already loaded.
    pub fn with_settings(store: S, settings: Settings) -> Self {
        Self {
            store,
            current: settings,
        }
    }

    /// The settings in effect.
    pub fn settings(&self) -> &Settings {
        &self.current
    }

    /// The store changes are saved to.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply a confirmed change: validate, persist, then commit.
    ///
    /// On any error the in-memory settings stay as they were.
    pub fn update<F>(&mut self, change: F) -> AppResult<()>
    where
        F: FnOnce(&mut Settings),
    {
        let mut next = self.current.clone();
        change(&mut next);
        next.validate()?;
        self.store.save(&next)?;
        self.current = next;
        Ok(())
    }

    /// Write the current settings, e.g. on exit.
    pub fn save(&self) -> AppResult<()> {
        self.store.save(&self.current)
    }
}
