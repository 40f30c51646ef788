//! CLI command implementations.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `demo` | Watch a mix of retained and released objects and report the outcome |
//! | `config` | Print the effective configuration |
//!
//! # Example Usage
//!
//! ```bash
//! # Keep 3 objects alive, release 5, check after 200ms
//! leakwatch demo --retained 3 --released 5 --delay-ms 200
//!
//! # Show what a config file plus environment resolve to
//! leakwatch --config ./leakwatch.toml config
//! ```

mod config;
mod demo;

pub use config::ConfigCommand;
pub use demo::{DemoCommand, DemoReport};
