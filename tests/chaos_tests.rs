//! Chaos testing for concurrent access.
//!
//! Submits, queries, clears and releases objects from many threads at once
//! while the checker thread classifies them, looking for deadlocks and
//! inconsistent counts.

// Chaos tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::needless_collect)]

use leakwatch::{ManualClock, ManualExecutor, ObjectWatcher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Runs `f` on a helper thread and fails if it does not finish in time.
fn assert_completes(timeout: Duration, f: impl FnOnce() + Send + 'static) {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        f();
        let _ = tx.send(());
    });
    assert!(rx.recv_timeout(timeout).is_ok(), "operation deadlocked");
}

/// Test: concurrent submissions and queries do not deadlock.
#[test]
fn test_concurrent_watch_and_query_no_deadlock() {
    assert_completes(Duration::from_secs(30), || {
        let watcher = ObjectWatcher::builder()
            .retained_delay(Duration::from_millis(1))
            .checker_thread_name("chaos-checker")
            .build()
            .expect("build watcher");

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let reentrant = watcher.clone();
        watcher.add_on_object_retained_listener(Arc::new(move || {
            let _ = reentrant.retained_object_count();
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let kept: Vec<Arc<usize>> = (0..8).map(Arc::new).collect();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let watcher = watcher.clone();
                let object = Arc::clone(&kept[t]);
                thread::spawn(move || {
                    for i in 0..200 {
                        match i % 4 {
                            0 => watcher.watch(&object, "kept"),
                            1 => {
                                let transient = Arc::new(i);
                                watcher.watch(&transient, "transient");
                            },
                            2 => {
                                let _ = watcher.has_retained_objects();
                                let _ = watcher.retained_objects();
                            },
                            _ => {
                                let _ = watcher.watched_object_count();
                            },
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker thread");
        }

        let expected = 8 * 50;
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while watcher.retained_object_count() < expected && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(watcher.retained_object_count(), expected);
        assert_eq!(watcher.watched_object_count(), expected);

        drop(kept);
        assert_eq!(watcher.watched_object_count(), 0);
        watcher.shutdown();
    });
}

/// Test: clearing while other threads submit keeps counts consistent.
#[test]
fn test_concurrent_clear_and_watch() {
    let clock = Arc::new(ManualClock::new(0));
    let executor = Arc::new(ManualExecutor::new());
    let watcher = ObjectWatcher::new(clock.clone(), executor.clone(), Duration::from_secs(5));
    let object = Arc::new(String::from("shared"));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let watcher = watcher.clone();
            let object = Arc::clone(&object);
            thread::spawn(move || {
                for _ in 0..250 {
                    if t == 0 {
                        watcher.clear_watched_objects();
                    } else {
                        watcher.watch(&object, "shared");
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread");
    }

    let remaining = watcher.watched_object_count();
    assert!(remaining <= 750);

    clock.advance(Duration::from_secs(5));
    executor.advance(Duration::from_secs(5));
    assert_eq!(watcher.retained_object_count(), remaining);

    watcher.clear_watched_objects();
    assert_eq!(Arc::weak_count(&object), 0);
}

/// Test: many listeners added and removed during notification.
#[test]
fn test_listener_churn_during_checks() {
    let clock = Arc::new(ManualClock::new(0));
    let executor = Arc::new(ManualExecutor::new());
    let watcher = ObjectWatcher::new(clock.clone(), executor.clone(), Duration::from_secs(1));
    let calls = Arc::new(AtomicUsize::new(0));

    let churn = {
        let watcher = watcher.clone();
        let calls = Arc::clone(&calls);
        thread::spawn(move || {
            for _ in 0..200 {
                let calls = Arc::clone(&calls);
                let listener: Arc<dyn leakwatch::OnObjectRetainedListener> =
                    Arc::new(move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                    });
                watcher.add_on_object_retained_listener(Arc::clone(&listener));
                watcher.remove_on_object_retained_listener(&listener);
            }
        })
    };

    let objects: Vec<Arc<u32>> = (0..100).map(Arc::new).collect();
    for object in &objects {
        watcher.watch(object, "churn");
    }
    clock.advance(Duration::from_secs(1));
    executor.advance(Duration::from_secs(1));
    churn.join().expect("churn thread");

    assert_eq!(watcher.retained_object_count(), 100);
    assert!(calls.load(Ordering::SeqCst) <= 100);
}
