//! Config CLI command.

use crate::config::WatcherConfig;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Config command handler.
#[derive(Debug, Default)]
pub struct ConfigCommand {
    source: Option<PathBuf>,
}

impl ConfigCommand {
    /// Creates a config command for a configuration loaded from `source`.
    #[must_use]
    pub const fn new(source: Option<PathBuf>) -> Self {
        Self { source }
    }

    /// Renders the effective configuration as text.
    #[must_use]
    pub fn render(&self, config: &WatcherConfig) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Current Configuration");
        let _ = writeln!(out, "=====================");
        let _ = writeln!(
            out,
            "Source: {}",
            self.source
                .as_ref()
                .map_or_else(|| "(defaults)".to_string(), |p| p.display().to_string())
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "Watcher:");
        let _ = writeln!(out, "  Enabled: {}", config.enabled);
        let _ = writeln!(out, "  Retained Delay: {}ms", config.retained_delay_ms);
        let _ = writeln!(out, "  Checker Thread: {}", config.checker_thread_name);
        let _ = writeln!(out, "  Event Bus Capacity: {}", config.event_bus_capacity);
        let _ = writeln!(out);
        let _ = writeln!(out, "Logging:");
        let _ = writeln!(
            out,
            "  Filter: {}",
            config.logging.filter.as_deref().unwrap_or("(default)")
        );
        let _ = writeln!(
            out,
            "  Format: {}",
            config.logging.format.as_deref().unwrap_or("pretty")
        );
        let _ = writeln!(
            out,
            "  File: {}",
            config
                .logging
                .file
                .as_ref()
                .map_or_else(|| "(stderr)".to_string(), |p| p.display().to_string())
        );
        out
    }
}
