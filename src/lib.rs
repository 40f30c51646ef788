//! # Leakwatch
//!
//! Retention detection for long-lived processes.
//!
//! Host code hands objects that are expected to become unreachable soon (a
//! closed session, a detached view, a finished request) to an
//! [`ObjectWatcher`]. The watcher keeps only a weak handle to each of them and,
//! after a grace delay, checks whether the handle was released. Objects that
//! are still alive are reported as retained and registered listeners are
//! notified, typically to decide whether a heap snapshot is worth taking.
//!
//! ## Features
//!
//! - Weak handles keyed by a random [`WatchKey`], drained opportunistically
//!   from a [`ReferenceQueue`] on every operation
//! - Pluggable [`Clock`] and [`CheckRetainedExecutor`] for deterministic tests
//! - Background checker thread or `tokio` runtime scheduling
//! - Structured logging with `tracing`, counters with `metrics`
//! - Optional broadcast [`EventBus`] for async consumers
//!
//! ## Example
//!
//! ```rust,no_run
//! use leakwatch::{ObjectWatcher, WatcherConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> leakwatch::Result<()> {
//! let watcher = ObjectWatcher::from_config(&WatcherConfig::default())?;
//! watcher.add_on_object_retained_listener(Arc::new(|| {
//!     tracing::warn!("an object outlived its lifecycle");
//! }));
//!
//! let session = Arc::new(String::from("closed session"));
//! watcher.watch(&session, "session closed by the client");
//! drop(session);
//!
//! watcher.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Reclamation semantics
//!
//! Rust has no tracing collector. A watched object counts as reclaimed once
//! the last strong [`Arc`](std::sync::Arc) owner released it, which the
//! watcher observes through the weak count of the shared control block.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cli;
pub mod clock;
pub mod config;
pub mod executor;
pub mod observability;
pub mod watcher;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LoggingSettings, WatcherConfig};
pub use executor::{CheckRetainedExecutor, ManualExecutor, ThreadExecutor, TokioExecutor};
pub use observability::{EventBus, WatcherEvent};
pub use watcher::{
    HeapDumpEpoch, KeyedWeakReference, ObjectWatcher, ObjectWatcherBuilder,
    OnObjectRetainedListener, ReachabilityWatcher, ReferenceQueue, Referent, RetainedObjectInfo,
    WatchKey,
};

/// Error type for leakwatch operations.
///
/// Watching and querying objects never fails. Errors only come from the
/// surrounding machinery.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed configuration values |
/// | `OperationFailed` | Config I/O, logging init, checker thread spawn |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A configuration value cannot be parsed (e.g. an unknown log format)
    /// - The retained delay is zero
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - The configuration file cannot be read or parsed
    /// - The logging subscriber was already installed
    /// - The checker thread cannot be spawned
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for leakwatch operations.
pub type Result<T> = std::result::Result<T, Error>;
