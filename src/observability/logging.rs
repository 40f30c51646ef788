//! Structured logging configuration.

use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive.
pub const LOG_FILTER_ENV: &str = "LEAKWATCH_LOG";

/// Environment variable selecting `pretty` or `json` output.
pub const LOG_FORMAT_ENV: &str = "LEAKWATCH_LOG_FORMAT";

/// Environment variable redirecting logs to a file.
pub const LOG_FILE_ENV: &str = "LEAKWATCH_LOG_FILE";

const DEFAULT_FILTER: &str = "leakwatch=info";
const VERBOSE_FILTER: &str = "leakwatch=debug";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for anything but `pretty` or `json`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidInput(format!("unknown log format: {other}"))),
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Event filter.
    pub filter: EnvFilter,
    /// Output format.
    pub format: LogFormat,
    /// Optional log file.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from environment variables only.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn from_env(verbose: bool) -> Result<Self> {
        Self::from_settings(None, verbose)
    }

    /// Builds logging configuration from config settings with env overrides.
    ///
    /// `verbose` raises the default level to debug when no filter is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter directive or the format is invalid.
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Result<Self> {
        let directive = std::env::var(LOG_FILTER_ENV)
            .ok()
            .or_else(|| settings.and_then(|s| s.filter.clone()))
            .unwrap_or_else(|| {
                if verbose {
                    VERBOSE_FILTER.to_string()
                } else {
                    DEFAULT_FILTER.to_string()
                }
            });
        let filter = EnvFilter::try_new(&directive)
            .map_err(|e| Error::InvalidInput(format!("invalid log filter '{directive}': {e}")))?;

        let format = match std::env::var(LOG_FORMAT_ENV)
            .ok()
            .or_else(|| settings.and_then(|s| s.format.clone()))
        {
            Some(name) => LogFormat::parse(&name)?,
            None => LogFormat::default(),
        };

        let file = std::env::var(LOG_FILE_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(|| settings.and_then(|s| s.file.clone()));

        Ok(Self {
            filter,
            format,
            file,
        })
    }
}
