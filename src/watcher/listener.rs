//! Retained-object notification fan-out.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Receives a call each time a watched object is classified as retained.
///
/// The call carries no payload. Query the watcher for
/// `retained_object_count()` or `retained_objects()` to decide what to do.
/// Listeners run on the checker thread, after the watcher released its lock.
pub trait OnObjectRetainedListener: Send + Sync {
    /// A watched object outlived its grace delay.
    fn on_object_retained(&self);
}

impl<F> OnObjectRetainedListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_object_retained(&self) {
        self();
    }
}

/// Set of listeners, compared by `Arc` identity.
#[derive(Default, Clone)]
pub(crate) struct ListenerSet {
    listeners: Vec<Arc<dyn OnObjectRetainedListener>>,
}

impl ListenerSet {
    /// Adds `listener` unless the same instance is already present.
    pub(crate) fn add(&mut self, listener: Arc<dyn OnObjectRetainedListener>) -> bool {
        if self.position(&listener).is_some() {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Removes the given instance. Returns `false` if it was not registered.
    pub(crate) fn remove(&mut self, listener: &Arc<dyn OnObjectRetainedListener>) -> bool {
        self.position(listener)
            .map(|index| self.listeners.remove(index))
            .is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Invokes every listener, isolating panics from one another.
    ///
    /// Returns the number of listeners that panicked.
    pub(crate) fn notify_all(&self) -> usize {
        let mut failures = 0;
        for listener in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_object_retained())).is_err() {
                failures += 1;
                metrics::counter!("leakwatch_listener_failures_total").increment(1);
                tracing::error!("retained-object listener panicked");
            }
        }
        failures
    }

    fn position(&self, listener: &Arc<dyn OnObjectRetainedListener>) -> Option<usize> {
        let target = Arc::as_ptr(listener).cast::<()>();
        self.listeners
            .iter()
            .position(|existing| Arc::as_ptr(existing).cast::<()>() == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Arc<dyn OnObjectRetainedListener> {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_add_same_instance_twice() {
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(&counter);
        let mut set = ListenerSet::default();

        assert!(set.add(Arc::clone(&listener)));
        assert!(!set.add(Arc::clone(&listener)));
        assert_eq!(set.len(), 1);

        set.notify_all();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_instances_both_notified() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = ListenerSet::default();
        set.add(counting_listener(&counter));
        set.add(counting_listener(&counter));

        set.notify_all();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove() {
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(&counter);
        let mut set = ListenerSet::default();
        set.add(Arc::clone(&listener));

        assert!(set.remove(&listener));
        assert!(!set.remove(&listener));

        set.notify_all();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[allow(clippy::panic)]
    fn failing_listener() {
        panic!("listener failure");
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = ListenerSet::default();
        set.add(Arc::new(failing_listener));
        set.add(counting_listener(&counter));

        let failures = set.notify_all();

        assert_eq!(failures, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
