//! Background thread executor.

use super::{CheckRetainedExecutor, Task, run_task};
use crate::{Error, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

enum Command {
    Schedule { deadline: Instant, task: Task },
    Shutdown,
}

struct Scheduled {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the `BinaryHeap` pops the earliest deadline first.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Executor backed by one named background thread.
///
/// Tasks are kept in a deadline heap owned by the thread and fed through a
/// channel, so scheduling never blocks on a running task.
///
/// # Example
///
/// ```rust
/// use leakwatch::{CheckRetainedExecutor, ThreadExecutor};
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// let executor = ThreadExecutor::spawn("checker")?;
/// let (tx, rx) = mpsc::channel();
/// executor.execute_after(Duration::from_millis(10), Box::new(move || {
///     let _ = tx.send(());
/// }));
/// assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
/// executor.shutdown();
/// # Ok::<(), leakwatch::Error>(())
/// ```
pub struct ThreadExecutor {
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadExecutor {
    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn(thread_name: impl Into<String>) -> Result<Self> {
        let thread_name = thread_name.into();
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_worker(&receiver))
            .map_err(|e| Error::OperationFailed {
                operation: "spawn_checker_thread".to_string(),
                cause: format!("{thread_name}: {e}"),
            })?;

        debug!(thread = %thread_name, "checker thread started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Whether [`shutdown`](CheckRetainedExecutor::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl CheckRetainedExecutor for ThreadExecutor {
    fn execute_after(&self, delay: Duration, task: Task) {
        let Some(deadline) = Instant::now().checked_add(delay) else {
            warn!(
                delay_secs = delay.as_secs(),
                "delay out of range for this platform, dropping scheduled check"
            );
            return;
        };
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let delivered = sender
            .as_ref()
            .is_some_and(|tx| tx.send(Command::Schedule { deadline, task }).is_ok());
        if !delivered {
            debug!("checker thread stopped, dropping scheduled check");
        }
    }

    #[instrument(name = "leakwatch.executor.shutdown", skip(self))]
    fn shutdown(&self) {
        if let Some(sender) = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = sender.send(Command::Shutdown);
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            // A task shutting down its own executor cannot wait for itself.
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                tracing::warn!("checker thread terminated abnormally");
            }
        }
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: &Receiver<Command>) {
    let mut pending: BinaryHeap<Scheduled> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        run_due(&mut pending);

        let next = match pending.peek() {
            Some(first) => {
                receiver.recv_timeout(first.deadline.saturating_duration_since(Instant::now()))
            },
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match next {
            Ok(Command::Schedule { deadline, task }) => {
                pending.push(Scheduled {
                    deadline,
                    seq,
                    task,
                });
                seq = seq.wrapping_add(1);
            },
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {},
        }
    }

    debug!(dropped = pending.len(), "checker thread stopped");
}

fn run_due(pending: &mut BinaryHeap<Scheduled>) {
    let now = Instant::now();
    while pending.peek().is_some_and(|first| first.deadline <= now) {
        if let Some(scheduled) = pending.pop() {
            run_task(scheduled.task);
        }
    }
}
