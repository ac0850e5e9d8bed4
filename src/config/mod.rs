//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then a TOML file, then
//! `REVGC_*` environment variables. Logging and metrics settings are kept
//! as raw, all-optional sections and resolved by [`crate::observability`],
//! which applies its own environment overrides.

mod duration;

pub use duration::{parse_duration, parse_interval, parse_optional_duration};

use crate::gc::GcSchedule;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default wait between background collections.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// Default minimum age of data before it may be collected.
pub const DEFAULT_GC_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default upper bound for a single collection.
pub const DEFAULT_GC_MAX_OPERATION_TIME: Duration = Duration::from_secs(60);

/// Main configuration for revgc.
#[derive(Debug, Clone, Default)]
pub struct RevgcConfig {
    /// Garbage collection timing.
    pub gc: GcConfig,
    /// Datastore selection.
    pub datastore: DatastoreConfig,
    /// Logging and metrics settings, resolved at startup.
    pub observability: ObservabilitySettings,
}

/// Garbage collection timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Wait between background collections. Zero disables the background
    /// collector.
    pub interval: Duration,
    /// Minimum age of data before it may be collected.
    pub window: Duration,
    /// Upper bound for one collection, retries included.
    pub max_operation_time: Duration,
    /// Upper bound for the backoff sequence inside one collection.
    pub max_elapsed_time: Option<Duration>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_GC_INTERVAL,
            window: DEFAULT_GC_WINDOW,
            max_operation_time: DEFAULT_GC_MAX_OPERATION_TIME,
            max_elapsed_time: None,
        }
    }
}

impl GcConfig {
    /// Returns `true` if the background collector should run.
    #[must_use]
    pub const fn background_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Turns the background collector off, as one-shot commands do.
    #[must_use]
    pub const fn without_background(mut self) -> Self {
        self.interval = Duration::ZERO;
        self
    }

    /// Schedule for [`crate::gc::start_garbage_collector`].
    #[must_use]
    pub const fn schedule(&self) -> GcSchedule {
        GcSchedule::new(self.interval, self.window, self.max_operation_time)
            .with_max_elapsed_time(self.max_elapsed_time)
    }
}

/// Supported datastore engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatastoreEngine {
    /// In-process [`crate::datastore::MemoryDatastore`].
    #[default]
    Memory,
}

impl DatastoreEngine {
    /// Parses an engine name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unknown engines.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(Error::InvalidInput(format!(
                "unknown datastore engine '{other}'"
            ))),
        }
    }

    /// Engine name as written in config files.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
        }
    }
}

/// Datastore selection.
#[derive(Debug, Clone, Default)]
pub struct DatastoreConfig {
    /// Engine backing the collector.
    pub engine: DatastoreEngine,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Garbage collection section.
    pub gc: Option<ConfigFileGc>,
    /// Datastore section.
    pub datastore: Option<ConfigFileDatastore>,
    /// Observability section.
    pub observability: Option<ObservabilitySettings>,
}

/// `[gc]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileGc {
    /// Interval, e.g. `"3m"`. Negative disables background collection.
    pub interval: Option<String>,
    /// Window, e.g. `"24h"`.
    pub window: Option<String>,
    /// Max operation time, e.g. `"1m"`.
    pub max_operation_time: Option<String>,
    /// Max backoff elapsed time, e.g. `"10m"` or `"none"`.
    pub max_elapsed_time: Option<String>,
}

/// `[datastore]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileDatastore {
    /// Engine name.
    pub engine: Option<String>,
}

/// `[observability]` section in config file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ObservabilitySettings {
    /// Logging settings.
    pub logging: Option<LoggingSettings>,
    /// Metrics settings.
    pub metrics: Option<MetricsSettings>,
}

/// `[observability.logging]` section in config file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingSettings {
    /// `"pretty"` or `"json"`.
    pub format: Option<String>,
    /// `tracing_subscriber` filter directive, e.g. `"revgc=debug"`.
    pub filter: Option<String>,
    /// Log file path. Logs go to stderr when unset.
    pub file: Option<String>,
}

/// `[observability.metrics]` section in config file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsSettings {
    /// Whether the Prometheus exporter is installed.
    pub enabled: Option<bool>,
    /// Port for the Prometheus HTTP listener.
    pub port: Option<u16>,
}

impl RevgcConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// in it is invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or a value is invalid.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/revgc/` on macOS)
    /// 2. XDG config dir (`~/.config/revgc/` for Unix compatibility)
    ///
    /// Returns default configuration if no config file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the first existing config file cannot be read or
    /// parsed.
    pub fn load_default() -> Result<Self> {
        Self::load_first_existing(&Self::default_paths())
    }

    /// Candidate config file paths, in lookup order.
    #[must_use]
    pub fn default_paths() -> Vec<PathBuf> {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Vec::new();
        };

        vec![
            base_dirs.config_dir().join("revgc").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("revgc")
                .join("config.toml"),
        ]
    }

    /// Loads the first of `paths` that exists, or the defaults if none does.
    ///
    /// # Errors
    ///
    /// Returns an error if that file cannot be read or parsed. Later paths
    /// are not tried.
    pub fn load_first_existing(paths: &[PathBuf]) -> Result<Self> {
        paths
            .iter()
            .find(|path| path.exists())
            .map_or_else(|| Ok(Self::default()), |path| Self::load_from_file(path))
    }

    /// Applies `REVGC_GC_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a variable holds an invalid
    /// duration.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    ///
    /// # Errors
    ///
    /// Same as [`RevgcConfig::with_env_overrides`].
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = value("REVGC_GC_INTERVAL") {
            self.gc.interval = parse_interval(&v)?;
        }
        if let Some(v) = value("REVGC_GC_WINDOW") {
            self.gc.window = parse_duration(&v)?;
        }
        if let Some(v) = value("REVGC_GC_MAX_OPERATION_TIME") {
            self.gc.max_operation_time = parse_duration(&v)?;
        }
        if let Some(v) = value("REVGC_GC_MAX_ELAPSED_TIME") {
            self.gc.max_elapsed_time = parse_optional_duration(&v)?;
        }
        if let Some(v) = value("REVGC_DATASTORE_ENGINE") {
            self.datastore.engine = DatastoreEngine::parse(&v)?;
        }

        Ok(self)
    }

    /// Converts a `ConfigFile` to `RevgcConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(gc) = file.gc {
            if let Some(v) = gc.interval {
                config.gc.interval = parse_interval(&v)?;
            }
            if let Some(v) = gc.window {
                config.gc.window = parse_duration(&v)?;
            }
            if let Some(v) = gc.max_operation_time {
                config.gc.max_operation_time = parse_duration(&v)?;
            }
            if let Some(v) = gc.max_elapsed_time {
                config.gc.max_elapsed_time = parse_optional_duration(&v)?;
            }
        }
        if let Some(engine) = file.datastore.and_then(|d| d.engine) {
            config.datastore.engine = DatastoreEngine::parse(&engine)?;
        }
        if let Some(observability) = file.observability {
            config.observability = observability;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RevgcConfig::new();
        assert_eq!(config.gc.interval, Duration::from_secs(180));
        assert_eq!(config.gc.window, Duration::from_secs(86_400));
        assert_eq!(config.gc.max_operation_time, Duration::from_secs(60));
        assert_eq!(config.gc.max_elapsed_time, None);
        assert!(config.gc.background_enabled());
        assert_eq!(config.datastore.engine, DatastoreEngine::Memory);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
[gc]
interval = "30s"
window = "1h"
max_operation_time = "10s"
max_elapsed_time = "2m"

[datastore]
engine = "memory"

[observability.logging]
format = "json"

[observability.metrics]
enabled = true
port = 9464
"#
        )
        .expect("write config");

        let config = RevgcConfig::load_from_file(file.path()).expect("load config");
        assert_eq!(config.gc.interval, Duration::from_secs(30));
        assert_eq!(config.gc.window, Duration::from_secs(3600));
        assert_eq!(config.gc.max_operation_time, Duration::from_secs(10));
        assert_eq!(config.gc.max_elapsed_time, Some(Duration::from_secs(120)));

        let metrics = config.observability.metrics.expect("metrics section");
        assert_eq!(metrics.enabled, Some(true));
        assert_eq!(metrics.port, Some(9464));
        let logging = config.observability.logging.expect("logging section");
        assert_eq!(logging.format.as_deref(), Some("json"));
    }

    #[test]
    fn test_invalid_duration_in_file_is_rejected() {
        let result = RevgcConfig::from_toml("[gc]\nwindow = \"soon\"\n");
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_missing_file_is_operation_failed() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let result = RevgcConfig::load_from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let env: HashMap<&str, &str> = [
            ("REVGC_GC_INTERVAL", "-1h"),
            ("REVGC_GC_WINDOW", "7d"),
            ("REVGC_GC_MAX_ELAPSED_TIME", "none"),
            ("REVGC_GC_MAX_OPERATION_TIME", ""),
        ]
        .into_iter()
        .collect();

        let config = RevgcConfig::from_toml("[gc]\nmax_elapsed_time = \"5m\"\n")
            .and_then(|c| c.with_overrides(|key| env.get(key).map(ToString::to_string)))
            .expect("apply overrides");

        assert!(!config.gc.background_enabled());
        assert_eq!(config.gc.window, Duration::from_secs(7 * 86_400));
        assert_eq!(config.gc.max_elapsed_time, None);
        assert_eq!(config.gc.max_operation_time, DEFAULT_GC_MAX_OPERATION_TIME);
    }

    #[test]
    fn test_schedule_mirrors_config() {
        let gc = GcConfig {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..GcConfig::default()
        };
        let schedule = gc.schedule();
        assert_eq!(schedule.interval, gc.interval);
        assert_eq!(schedule.window, gc.window);
        assert_eq!(schedule.timeout, gc.max_operation_time);
        assert_eq!(schedule.max_elapsed_time, Some(Duration::from_secs(30)));
        assert!(!gc.without_background().background_enabled());
    }

    #[test]
    fn test_first_existing_config_wins() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("config.toml");
        std::fs::write(&present, "[gc]\nwindow = \"2h\"\n").expect("write config");

        let config = RevgcConfig::load_first_existing(&[missing.clone(), present])
            .expect("load config");
        assert_eq!(config.gc.window, Duration::from_secs(7200));

        let config = RevgcConfig::load_first_existing(&[missing]).expect("defaults");
        assert_eq!(config.gc.window, DEFAULT_GC_WINDOW);
    }

    #[test]
    fn test_malformed_default_config_is_an_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let broken = dir.path().join("config.toml");
        let fallback = dir.path().join("fallback.toml");
        std::fs::write(&broken, "[gc\nwindow = ").expect("write config");
        std::fs::write(&fallback, "[gc]\nwindow = \"2h\"\n").expect("write config");

        let result = RevgcConfig::load_first_existing(&[broken, fallback]);
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }

    #[test]
    fn test_unknown_engine() {
        assert!(DatastoreEngine::parse("postgres").is_err());
        assert_eq!(DatastoreEngine::Memory.as_str(), "memory");
    }
}
