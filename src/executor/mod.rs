//! Delayed execution of retained-object checks.
//!
//! The watcher never checks an object on the thread that submitted it. Each
//! submission schedules one task on a [`CheckRetainedExecutor`] that runs no
//! earlier than the configured grace delay.
//!
//! | Executor | Runs tasks on |
//! |----------|---------------|
//! | [`ThreadExecutor`] | A dedicated named background thread |
//! | [`TokioExecutor`] | A `tokio` runtime (blocking pool) |
//! | [`ManualExecutor`] | Whoever calls `advance`/`run_pending` (tests) |

mod manual;
mod runtime;
mod thread;

pub use manual::ManualExecutor;
pub use runtime::TokioExecutor;
pub use thread::ThreadExecutor;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Schedules tasks to run after a delay.
///
/// Implementations must run each task at most once, never before its delay
/// elapsed, and never on the caller's stack.
pub trait CheckRetainedExecutor: Send + Sync {
    /// Schedules `task` to run once `delay` has elapsed.
    fn execute_after(&self, delay: Duration, task: Task);

    /// Stops accepting work and releases background resources.
    ///
    /// Tasks that have not run yet are dropped.
    fn shutdown(&self) {}
}

/// Runs a task, logging instead of unwinding into the executor.
pub(crate) fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        metrics::counter!("leakwatch_executor_task_panics_total").increment(1);
        tracing::error!("scheduled retained check panicked");
    }
}
