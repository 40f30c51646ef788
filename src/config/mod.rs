//! Configuration management.
//!
//! Configuration is resolved in three layers:
//! 1. Built-in defaults
//! 2. A TOML file (explicit path, or the platform config directory)
//! 3. Environment variable overrides
//!
//! ```toml
//! enabled = true
//! retained_delay_ms = 5000
//! checker_thread_name = "leakwatch-checker"
//!
//! [logging]
//! filter = "leakwatch=debug"
//! format = "json"
//! ```

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable toggling the watcher on or off.
pub const ENABLED_ENV: &str = "LEAKWATCH_ENABLED";

/// Environment variable overriding the retained delay in milliseconds.
pub const RETAINED_DELAY_MS_ENV: &str = "LEAKWATCH_RETAINED_DELAY_MS";

/// Default grace delay before a watched object is checked (5 seconds).
pub const DEFAULT_RETAINED_DELAY_MS: u64 = 5000;

/// Largest accepted retained delay (one day).
pub const MAX_RETAINED_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Default name of the background checker thread.
pub const DEFAULT_CHECKER_THREAD_NAME: &str = "leakwatch-checker";

/// Default capacity of the watcher event bus.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Main configuration for a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Whether submitted objects are watched at all.
    pub enabled: bool,
    /// Grace delay before a watched object is checked, in milliseconds.
    pub retained_delay_ms: u64,
    /// Name of the background checker thread.
    pub checker_thread_name: String,
    /// Capacity of the event bus, if one is attached.
    pub event_bus_capacity: usize,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `leakwatch=debug`.
    pub filter: Option<String>,
    /// Output format: `pretty` or `json`.
    pub format: Option<String>,
    /// Optional log file. Logs go to stderr when unset.
    pub file: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Enable flag.
    pub enabled: Option<bool>,
    /// Retained delay.
    pub retained_delay_ms: Option<u64>,
    /// Checker thread name.
    pub checker_thread_name: Option<String>,
    /// Event bus capacity.
    pub event_bus_capacity: Option<usize>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLogging {
    /// Filter directive.
    pub filter: Option<String>,
    /// Output format.
    pub format: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retained_delay_ms: DEFAULT_RETAINED_DELAY_MS,
            checker_thread_name: DEFAULT_CHECKER_THREAD_NAME.to_string(),
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
            logging: LoggingSettings::default(),
        }
    }
}

impl WatcherConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::parse_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML, contains unknown keys,
    /// or sets a zero retained delay.
    pub fn parse_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        let config = Self::from_config_file(file);
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `<platform config dir>/leakwatch/config.toml`, then
    /// `~/.config/leakwatch/config.toml`. Returns defaults if neither exists
    /// or parses.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let platform_config = base_dirs.config_dir().join("leakwatch").join("config.toml");
        if platform_config.exists()
            && let Ok(config) = Self::load_from_file(&platform_config)
        {
            return config;
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("leakwatch")
            .join("config.toml");
        if xdg_config.exists()
            && let Ok(config) = Self::load_from_file(&xdg_config)
        {
            return config;
        }

        Self::default()
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `LEAKWATCH_ENABLED` | `true`/`1` or `false`/`0` |
    /// | `LEAKWATCH_RETAINED_DELAY_MS` | Grace delay, must be positive |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var(ENABLED_ENV)
            && let Some(enabled) = parse_bool(&v)
        {
            self.enabled = enabled;
        }
        if let Ok(v) = std::env::var(RETAINED_DELAY_MS_ENV)
            && let Ok(parsed) = v.parse::<u64>()
            && parsed > 0
        {
            self.retained_delay_ms = parsed;
        }
        self
    }

    /// Checks values that would make the watcher misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a zero or out-of-range retained
    /// delay, or an empty checker thread name.
    pub fn validate(&self) -> Result<()> {
        if self.retained_delay_ms == 0 {
            return Err(Error::InvalidInput(
                "retained_delay_ms must be positive".to_string(),
            ));
        }
        if self.retained_delay_ms > MAX_RETAINED_DELAY_MS {
            return Err(Error::InvalidInput(format!(
                "retained_delay_ms must not exceed {MAX_RETAINED_DELAY_MS}"
            )));
        }
        if self.checker_thread_name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "checker_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the grace delay as a [`Duration`].
    #[must_use]
    pub const fn retained_delay(&self) -> Duration {
        Duration::from_millis(self.retained_delay_ms)
    }

    /// Converts a `ConfigFile` to `WatcherConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(enabled) = file.enabled {
            config.enabled = enabled;
        }
        if let Some(delay) = file.retained_delay_ms {
            config.retained_delay_ms = delay;
        }
        if let Some(name) = file.checker_thread_name {
            config.checker_thread_name = name;
        }
        if let Some(capacity) = file.event_bus_capacity {
            config.event_bus_capacity = capacity.max(1);
        }
        if let Some(logging) = file.logging {
            config.logging.filter = logging.filter;
            config.logging.format = logging.format;
            config.logging.file = logging.file.map(PathBuf::from);
        }

        config
    }

    /// Sets the enable flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the retained delay.
    #[must_use]
    pub fn with_retained_delay(mut self, delay: Duration) -> Self {
        self.retained_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the checker thread name.
    #[must_use]
    pub fn with_checker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.checker_thread_name = name.into();
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_defaults() {
        let config = WatcherConfig::default();
        assert!(config.enabled);
        assert_eq!(config.retained_delay_ms, 5000);
        assert_eq!(config.retained_delay(), Duration::from_secs(5));
        assert_eq!(config.checker_thread_name, "leakwatch-checker");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_file() {
        let config = WatcherConfig::parse_toml(
            r#"
            enabled = false
            retained_delay_ms = 250
            checker_thread_name = "checker"
            event_bus_capacity = 8

            [logging]
            filter = "leakwatch=trace"
            format = "json"
            file = "/tmp/leakwatch.log"
            "#,
        )
        .expect("config should parse");

        assert!(!config.enabled);
        assert_eq!(config.retained_delay_ms, 250);
        assert_eq!(config.checker_thread_name, "checker");
        assert_eq!(config.event_bus_capacity, 8);
        assert_eq!(config.logging.filter.as_deref(), Some("leakwatch=trace"));
        assert_eq!(config.logging.format.as_deref(), Some("json"));
        assert_eq!(
            config.logging.file,
            Some(PathBuf::from("/tmp/leakwatch.log"))
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = WatcherConfig::parse_toml("retained_delay_ms = 1000").expect("parse");
        assert!(config.enabled);
        assert_eq!(config.retained_delay_ms, 1000);
        assert_eq!(config.checker_thread_name, DEFAULT_CHECKER_THREAD_NAME);
    }

    #[test]
    fn test_zero_delay_rejected() {
        let err = WatcherConfig::parse_toml("retained_delay_ms = 0").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_oversized_delay_rejected() {
        let err = WatcherConfig::parse_toml("retained_delay_ms = 86400001").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let config = WatcherConfig::default().with_retained_delay(Duration::MAX);
        assert!(config.validate().is_err());
        assert!(
            WatcherConfig::default()
                .with_retained_delay(Duration::from_millis(MAX_RETAINED_DELAY_MS))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = WatcherConfig::parse_toml("retained_delay = 10").unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "enabled = false\n").expect("write config");

        let config = WatcherConfig::load_from_file(&path).expect("load");
        assert!(!config.enabled);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = WatcherConfig::load_from_file(Path::new("/nonexistent/leakwatch.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("read_config_file"));
    }

    #[test]
    fn test_builders() {
        let config = WatcherConfig::new()
            .with_enabled(false)
            .with_retained_delay(Duration::from_millis(1500))
            .with_checker_thread_name("bg");
        assert!(!config.enabled);
        assert_eq!(config.retained_delay_ms, 1500);
        assert_eq!(config.checker_thread_name, "bg");
    }

    #[test_case("true" => Some(true); "lowercase true")]
    #[test_case("TRUE" => Some(true); "uppercase true")]
    #[test_case("1" => Some(true); "one")]
    #[test_case("off" => Some(false); "off")]
    #[test_case("0" => Some(false); "zero")]
    #[test_case("maybe" => None; "garbage")]
    fn test_parse_bool(input: &str) -> Option<bool> {
        parse_bool(input)
    }
}
