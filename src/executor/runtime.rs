//! `tokio` runtime executor.

use super::{CheckRetainedExecutor, Task, run_task};
use crate::{Error, Result};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Executor that schedules checks on an existing `tokio` runtime.
///
/// The delay is a `tokio::time::sleep`; the check itself runs on the blocking
/// pool because it takes a `std` mutex and calls arbitrary listeners.
pub struct TokioExecutor {
    handle: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioExecutor {
    /// Creates an executor for the given runtime.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self {
            handle,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Creates an executor for the runtime the caller is running on.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a `tokio` runtime.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| Error::OperationFailed {
            operation: "tokio_executor".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self::new(handle))
    }

    /// Number of scheduled checks that have not completed.
    #[must_use]
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.len()
    }
}

impl CheckRetainedExecutor for TokioExecutor {
    fn execute_after(&self, delay: Duration, task: Task) {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(move || run_task(task)).await {
                tracing::warn!(error = %e, "retained check did not complete");
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(join);
    }

    fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }
}
