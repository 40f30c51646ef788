//! Manually driven executor for deterministic tests.

use super::{CheckRetainedExecutor, Task, run_task};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

struct Pending {
    due: Duration,
    task: Task,
}

#[derive(Default)]
struct State {
    now: Duration,
    pending: Vec<Pending>,
}

/// Executor that keeps tasks until the test advances virtual time.
///
/// Tasks run on the thread calling [`advance`](Self::advance) or
/// [`run_pending`](Self::run_pending), outside of the executor's own lock,
/// so they may schedule further tasks.
///
/// # Example
///
/// ```rust
/// use leakwatch::{CheckRetainedExecutor, ManualExecutor};
/// use std::time::Duration;
///
/// let executor = ManualExecutor::new();
/// executor.execute_after(Duration::from_secs(5), Box::new(|| {}));
/// assert_eq!(executor.advance(Duration::from_secs(4)), 0);
/// assert_eq!(executor.advance(Duration::from_secs(1)), 1);
/// ```
#[derive(Default)]
pub struct ManualExecutor {
    state: Mutex<State>,
}

impl ManualExecutor {
    /// Creates an executor at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Delays, relative to the current virtual time, of the waiting tasks.
    #[must_use]
    pub fn pending_delays(&self) -> Vec<Duration> {
        let state = self.lock();
        state
            .pending
            .iter()
            .map(|p| p.due.saturating_sub(state.now))
            .collect()
    }

    /// Moves virtual time forward and runs every task that became due.
    ///
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let due = {
            let mut state = self.lock();
            state.now = state.now.saturating_add(by);
            let now = state.now;
            let (due, later): (Vec<_>, Vec<_>) =
                state.pending.drain(..).partition(|p| p.due <= now);
            state.pending = later;
            due
        };
        Self::run(due)
    }

    /// Runs every waiting task regardless of its delay.
    pub fn run_pending(&self) -> usize {
        let all = std::mem::take(&mut self.lock().pending);
        Self::run(all)
    }

    fn run(mut tasks: Vec<Pending>) -> usize {
        tasks.sort_by_key(|p| p.due);
        let count = tasks.len();
        for pending in tasks {
            run_task(pending.task);
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CheckRetainedExecutor for ManualExecutor {
    fn execute_after(&self, delay: Duration, task: Task) {
        let mut state = self.lock();
        let due = state.now.saturating_add(delay);
        state.pending.push(Pending { due, task });
    }

    fn shutdown(&self) {
        self.lock().pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_advance_runs_only_due_tasks() {
        let executor = ManualExecutor::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for secs in [1, 5, 10] {
            let ran = Arc::clone(&ran);
            executor.execute_after(
                Duration::from_secs(secs),
                Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        assert_eq!(executor.advance(Duration::from_secs(5)), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert_eq!(executor.pending_delays(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn test_task_may_schedule_another() {
        let executor = Arc::new(ManualExecutor::new());
        let inner = Arc::clone(&executor);
        executor.execute_after(
            Duration::ZERO,
            Box::new(move || {
                inner.execute_after(Duration::from_secs(1), Box::new(|| {}));
            }),
        );

        assert_eq!(executor.run_pending(), 1);
        assert_eq!(executor.pending(), 1);
    }

    #[test]
    fn test_huge_delay_saturates() {
        let executor = ManualExecutor::new();
        executor.advance(Duration::from_secs(1));
        executor.execute_after(Duration::MAX, Box::new(|| {}));

        assert_eq!(executor.advance(Duration::from_secs(1)), 0);
        assert_eq!(executor.advance(Duration::MAX), 1);
    }

    #[test]
    fn test_shutdown_clears() {
        let executor = ManualExecutor::new();
        executor.execute_after(Duration::ZERO, Box::new(|| {}));
        executor.shutdown();
        assert_eq!(executor.pending(), 0);
    }
}
