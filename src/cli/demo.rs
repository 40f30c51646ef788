//! Demo CLI command.
//!
//! Watches `retained` objects that stay referenced and `released` objects
//! that are dropped right away, waits for the checks, then simulates a heap
//! dump and clears what it covered.

use crate::config::WatcherConfig;
use crate::executor::TokioExecutor;
use crate::observability::EventBus;
use crate::watcher::{ObjectWatcher, RetainedObjectInfo};
use crate::Result;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Demo command handler.
#[derive(Debug, Clone)]
pub struct DemoCommand {
    retained: usize,
    released: usize,
    delay: Option<Duration>,
}

/// Outcome of a demo run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    /// Objects submitted.
    pub watched: usize,
    /// Retained objects found after the delay.
    pub retained: Vec<RetainedObjectInfo>,
    /// Listener invocations.
    pub notifications: usize,
    /// Clock time of the simulated heap dump.
    pub heap_dump_uptime_millis: u64,
    /// Registrations cleared after the heap dump.
    pub cleared: usize,
    /// Registrations left after clearing.
    pub remaining: usize,
}

impl DemoCommand {
    /// Creates a demo command.
    ///
    /// `delay` overrides the configured retained delay.
    #[must_use]
    pub const fn new(retained: usize, released: usize, delay: Option<Duration>) -> Self {
        Self {
            retained,
            released,
            delay,
        }
    }

    /// Runs the demo on the current `tokio` runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no runtime is
    /// available.
    pub async fn run(&self, config: &WatcherConfig) -> Result<DemoReport> {
        let config = match self.delay {
            Some(delay) => config.clone().with_retained_delay(delay),
            None => config.clone(),
        }
        .with_enabled(true);
        config.validate()?;

        let watcher = ObjectWatcher::builder()
            .executor(Arc::new(TokioExecutor::current()?))
            .retained_delay(config.retained_delay())
            .event_bus(EventBus::new(config.event_bus_capacity))
            .build()?;

        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notifications);
        watcher.add_on_object_retained_listener(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let kept: Vec<Arc<String>> = (0..self.retained)
            .map(|i| Arc::new(format!("retained-{i}")))
            .collect();
        for (i, object) in kept.iter().enumerate() {
            watcher.watch(object, &format!("demo object {i} kept alive"));
        }
        for i in 0..self.released {
            let object = Arc::new(format!("released-{i}"));
            watcher.watch(&object, &format!("demo object {i} released"));
        }
        info!(
            retained = self.retained,
            released = self.released,
            delay_ms = config.retained_delay_ms,
            "Demo objects submitted"
        );

        tokio::time::sleep(config.retained_delay()).await;
        let deadline = tokio::time::Instant::now() + config.retained_delay() + Duration::from_secs(1);
        while watcher.retained_object_count() < self.retained
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let retained = watcher.retained_object_infos();
        let heap_dump_uptime_millis = watcher.mark_heap_dump();
        let cleared = watcher.clear_objects_watched_before_heap_dump();
        let remaining = watcher.watched_object_count();
        watcher.shutdown();
        drop(kept);

        Ok(DemoReport {
            watched: self.retained + self.released,
            retained,
            notifications: notifications.load(Ordering::SeqCst),
            heap_dump_uptime_millis,
            cleared,
            remaining,
        })
    }
}

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Watched: {}", self.watched)?;
        writeln!(f, "Retained: {}", self.retained.len())?;
        for info in &self.retained {
            writeln!(
                f,
                "  - {} ({}), retained {}ms before heap dump",
                info.description,
                info.key,
                info.retained_duration_millis(self.heap_dump_uptime_millis)
                    .unwrap_or_default()
            )?;
        }
        writeln!(f, "Listener notifications: {}", self.notifications)?;
        writeln!(f, "Heap dump at: {}ms", self.heap_dump_uptime_millis)?;
        writeln!(f, "Cleared after heap dump: {}", self.cleared)?;
        write!(f, "Remaining: {}", self.remaining)
    }
}
