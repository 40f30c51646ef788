//! Monotonic time sources.
//!
//! The watcher never reads wall-clock time. Every timestamp it records comes
//! from an injected [`Clock`], which makes retention decisions reproducible in
//! tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic, non-decreasing millisecond time source.
pub trait Clock: Send + Sync {
    /// Returns the current uptime in milliseconds.
    fn uptime_millis(&self) -> u64;
}

impl<F> Clock for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn uptime_millis(&self) -> u64 {
        self()
    }
}

/// Clock backed by [`Instant`], counting from its own creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose uptime starts at zero now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn uptime_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to.
///
/// # Example
///
/// ```rust
/// use leakwatch::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(100);
/// clock.advance(Duration::from_millis(50));
/// assert_eq!(clock.uptime_millis(), 150);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `start_millis`.
    #[must_use]
    pub const fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// Sets the current time.
    ///
    /// Values lower than the current time are ignored to keep the clock
    /// monotonic.
    pub fn set(&self, millis: u64) {
        self.millis.fetch_max(millis, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        let _ = self
            .millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(by))
            });
    }
}

impl Clock for ManualClock {
    fn uptime_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.uptime_millis();
        std::thread::sleep(Duration::from_millis(5));
        let second = clock.uptime_millis();
        assert!(second >= first);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(10);
        clock.advance(Duration::from_millis(90));
        assert_eq!(clock.uptime_millis(), 100);
    }

    #[test]
    fn test_manual_clock_never_goes_back() {
        let clock = ManualClock::new(200);
        clock.set(100);
        assert_eq!(clock.uptime_millis(), 200);
        clock.set(300);
        assert_eq!(clock.uptime_millis(), 300);
    }

    #[test]
    fn test_closure_is_a_clock() {
        let clock: Arc<dyn Clock> = Arc::new(|| 42_u64);
        assert_eq!(clock.uptime_millis(), 42);
    }
}
