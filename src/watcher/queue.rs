//! Reclamation channel for watched objects.
//!
//! A registration is enqueued once the last strong `Arc` owner of its object
//! is gone. The queue only ever gets drained through the non-blocking
//! [`ReferenceQueue::poll`]; nothing waits on it.
//!
//! # Cost
//!
//! Dropping an `Arc` notifies nobody, so reclamation can only be found by
//! looking. A `poll` that finds the ready list empty sweeps every armed
//! handle, which makes each drain O(live registrations) under the watcher
//! lock and N submissions O(N^2) overall. Each step is a single atomic load;
//! the `watch` group in `benches/watcher.rs` measures it. [`ReferenceQueue::drain`]
//! sweeps once per call, where a `poll` loop sweeps again after the last key.
//! Hosts that keep many objects watched should clear them after each heap
//! dump.

use super::WatchKey;
use super::reference::Referent;
use std::collections::{HashMap, VecDeque};
use std::sync::Weak;

/// Keys of watched objects whose last strong owner dropped them.
///
/// Reclamation is observed through the `Arc` control block: a registration
/// moves to the ready list when its weak handle reports a strong count of
/// zero. Objects are never resurrected, so a key is enqueued at most once.
#[derive(Debug, Default)]
pub struct ReferenceQueue {
    armed: HashMap<WatchKey, Weak<Referent>>,
    ready: VecDeque<WatchKey>,
}

impl ReferenceQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking reclamation of `referent` under `key`.
    pub fn register(&mut self, key: WatchKey, referent: Weak<Referent>) {
        self.armed.insert(key, referent);
    }

    /// Stops tracking `key`, whether or not it was already enqueued.
    ///
    /// Returns `true` if the key was known to the queue.
    pub fn unregister(&mut self, key: &WatchKey) -> bool {
        let armed = self.armed.remove(key).is_some();
        let before = self.ready.len();
        self.ready.retain(|ready| ready != key);
        armed || self.ready.len() != before
    }

    /// Forgets every registration.
    pub fn unregister_all(&mut self) {
        self.armed.clear();
        self.ready.clear();
    }

    /// Returns the next reclaimed key, or `None` if nothing is pending.
    pub fn poll(&mut self) -> Option<WatchKey> {
        if self.ready.is_empty() {
            self.enqueue_reclaimed();
        }
        self.ready.pop_front()
    }

    /// Hands out every reclaimed key with a single sweep.
    pub fn drain(&mut self) -> Vec<WatchKey> {
        self.enqueue_reclaimed();
        self.ready.drain(..).collect()
    }

    /// Number of registrations not yet handed out by [`poll`](Self::poll).
    #[must_use]
    pub fn len(&self) -> usize {
        self.armed.len() + self.ready.len()
    }

    /// Whether the queue tracks nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty() && self.ready.is_empty()
    }

    fn enqueue_reclaimed(&mut self) {
        let ready = &mut self.ready;
        self.armed.retain(|key, referent| {
            if referent.strong_count() == 0 {
                ready.push_back(key.clone());
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn drain(queue: &mut ReferenceQueue) -> HashSet<WatchKey> {
        std::iter::from_fn(|| queue.poll()).collect()
    }

    #[test]
    fn test_poll_empty() {
        let mut queue = ReferenceQueue::new();
        assert!(queue.poll().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_live_object_not_enqueued() {
        let object: Arc<Referent> = Arc::new(1_u32);
        let mut queue = ReferenceQueue::new();
        queue.register(WatchKey::from("live"), Arc::downgrade(&object));

        assert!(queue.poll().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_dropped_object_enqueued_once() {
        let object: Arc<Referent> = Arc::new(1_u32);
        let mut queue = ReferenceQueue::new();
        queue.register(WatchKey::from("dropped"), Arc::downgrade(&object));
        drop(object);

        assert_eq!(queue.poll(), Some(WatchKey::from("dropped")));
        assert!(queue.poll().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_same_object_two_keys() {
        let object: Arc<Referent> = Arc::new(1_u32);
        let mut queue = ReferenceQueue::new();
        queue.register(WatchKey::from("a"), Arc::downgrade(&object));
        queue.register(WatchKey::from("b"), Arc::downgrade(&object));
        drop(object);

        let drained = drain(&mut queue);
        assert_eq!(
            drained,
            HashSet::from([WatchKey::from("a"), WatchKey::from("b")])
        );
    }

    #[test]
    fn test_drain_returns_all_reclaimed_keys() {
        let live: Arc<Referent> = Arc::new(0_u32);
        let mut queue = ReferenceQueue::new();
        queue.register(WatchKey::from("live"), Arc::downgrade(&live));
        for i in 0..3 {
            let object: Arc<Referent> = Arc::new(i);
            queue.register(WatchKey::from(format!("gone-{i}")), Arc::downgrade(&object));
        }

        let drained: HashSet<WatchKey> = queue.drain().into_iter().collect();

        assert_eq!(drained.len(), 3);
        assert!(!drained.contains(&WatchKey::from("live")));
        assert!(queue.drain().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_unregister_suppresses_enqueue() {
        let object: Arc<Referent> = Arc::new(1_u32);
        let key = WatchKey::from("cleared");
        let mut queue = ReferenceQueue::new();
        queue.register(key.clone(), Arc::downgrade(&object));

        assert!(queue.unregister(&key));
        drop(object);

        assert!(queue.poll().is_none());
        assert!(!queue.unregister(&key));
    }
}
