//! Keyed weak handles to watched objects.

use super::WatchKey;
use std::any::Any;
use std::sync::{Arc, Weak};

/// Type-erased watched object.
pub type Referent = dyn Any + Send + Sync;

/// A weak handle to a watched object plus the bookkeeping the watcher needs.
///
/// The handle never keeps the object alive. Once the last strong owner drops
/// it, [`get`](Self::get) returns `None` and the registration shows up in the
/// [`ReferenceQueue`](super::ReferenceQueue).
#[derive(Debug)]
pub struct KeyedWeakReference {
    key: WatchKey,
    description: String,
    watch_uptime_millis: u64,
    retained_uptime_millis: Option<u64>,
    referent: Weak<Referent>,
}

impl KeyedWeakReference {
    /// Creates a handle to `referent` watched since `watch_uptime_millis`.
    #[must_use]
    pub fn new(
        referent: Weak<Referent>,
        key: WatchKey,
        description: impl Into<String>,
        watch_uptime_millis: u64,
    ) -> Self {
        Self {
            key,
            description: description.into(),
            watch_uptime_millis,
            retained_uptime_millis: None,
            referent,
        }
    }

    /// Registration key.
    #[must_use]
    pub const fn key(&self) -> &WatchKey {
        &self.key
    }

    /// Why the object was expected to become unreachable.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Clock time at which watching started.
    #[must_use]
    pub const fn watch_uptime_millis(&self) -> u64 {
        self.watch_uptime_millis
    }

    /// Clock time of the check that found the object still alive.
    #[must_use]
    pub const fn retained_uptime_millis(&self) -> Option<u64> {
        self.retained_uptime_millis
    }

    /// Whether a check already classified the object as retained.
    #[must_use]
    pub const fn is_retained(&self) -> bool {
        self.retained_uptime_millis.is_some()
    }

    /// Upgrades to the watched object if it is still alive.
    #[must_use]
    pub fn get(&self) -> Option<Arc<Referent>> {
        self.referent.upgrade()
    }

    /// Whether the last strong owner released the object.
    #[must_use]
    pub fn is_reclaimed(&self) -> bool {
        self.referent.strong_count() == 0
    }

    /// Returns another weak handle to the same object.
    #[must_use]
    pub fn downgrade(&self) -> Weak<Referent> {
        Weak::clone(&self.referent)
    }

    /// Marks the object retained at `uptime_millis`.
    ///
    /// Returns `true` only on the transition into the retained state; the
    /// first timestamp is kept on repeated calls.
    pub fn mark_retained(&mut self, uptime_millis: u64) -> bool {
        if self.retained_uptime_millis.is_some() {
            return false;
        }
        self.retained_uptime_millis = Some(uptime_millis);
        true
    }

    /// How long the object had been retained when the heap was dumped.
    ///
    /// `None` if the object is not retained or was classified after the dump.
    #[must_use]
    pub fn retained_duration_millis(&self, heap_dump_uptime_millis: u64) -> Option<u64> {
        self.retained_uptime_millis
            .and_then(|retained| heap_dump_uptime_millis.checked_sub(retained))
    }

    /// Releases the weak handle and resets the retained state.
    pub fn clear(&mut self) {
        let released: Weak<Referent> = Weak::<()>::new();
        self.referent = released;
        self.retained_uptime_millis = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_to(object: &Arc<Referent>, watched_at: u64) -> KeyedWeakReference {
        KeyedWeakReference::new(
            Arc::downgrade(object),
            WatchKey::generate(),
            "test object",
            watched_at,
        )
    }

    #[test]
    fn test_get_while_alive() {
        let object: Arc<Referent> = Arc::new(7_u32);
        let reference = reference_to(&object, 0);

        let upgraded = reference.get().expect("object is alive");
        assert_eq!(upgraded.downcast_ref::<u32>(), Some(&7));
        assert!(!reference.is_reclaimed());
    }

    #[test]
    fn test_reclaimed_after_last_owner_drops() {
        let object: Arc<Referent> = Arc::new(String::from("gone"));
        let reference = reference_to(&object, 0);
        drop(object);

        assert!(reference.is_reclaimed());
        assert!(reference.get().is_none());
    }

    #[test]
    fn test_mark_retained_only_once() {
        let object: Arc<Referent> = Arc::new(1_u8);
        let mut reference = reference_to(&object, 100);

        assert!(!reference.is_retained());
        assert!(reference.mark_retained(600));
        assert!(!reference.mark_retained(900));
        assert_eq!(reference.retained_uptime_millis(), Some(600));
    }

    #[test]
    fn test_clear_releases_handle() {
        let object: Arc<Referent> = Arc::new(1_u8);
        let mut reference = reference_to(&object, 0);
        reference.mark_retained(10);

        reference.clear();

        assert!(reference.get().is_none());
        assert!(!reference.is_retained());
        assert_eq!(Arc::weak_count(&object), 0);
    }

    #[test]
    fn test_retained_duration() {
        let object: Arc<Referent> = Arc::new(1_u8);
        let mut reference = reference_to(&object, 0);
        assert_eq!(reference.retained_duration_millis(1000), None);

        reference.mark_retained(400);
        assert_eq!(reference.retained_duration_millis(1000), Some(600));
        assert_eq!(reference.retained_duration_millis(100), None);
    }
}
