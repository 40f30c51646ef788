//! Heap dump epoch marker.

use crate::clock::Clock;
use std::sync::{Mutex, PoisonError};

/// Clock time of the most recent heap dump.
///
/// Set right before a snapshot is taken. Everything watched at or before the
/// marker is covered by that snapshot and can be cleared.
#[derive(Debug, Default)]
pub struct HeapDumpEpoch {
    uptime_millis: Mutex<Option<u64>>,
}

impl HeapDumpEpoch {
    /// Creates a marker that has never been set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            uptime_millis: Mutex::new(None),
        }
    }

    /// Records `clock`'s current time as the dump instant and returns it.
    pub fn mark(&self, clock: &dyn Clock) -> u64 {
        let mut last = self
            .uptime_millis
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = clock.uptime_millis();
        *last = Some(last.map_or(now, |previous| previous.max(now)));
        now
    }

    /// Returns the last recorded dump instant, `None` if no dump was marked.
    #[must_use]
    pub fn last(&self) -> Option<u64> {
        *self
            .uptime_millis
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_mark_records_clock_time() {
        let clock = ManualClock::new(1234);
        let epoch = HeapDumpEpoch::new();
        assert_eq!(epoch.last(), None);

        assert_eq!(epoch.mark(&clock), 1234);
        assert_eq!(epoch.last(), Some(1234));
    }
}
