//! Retention registry.
//!
//! [`ObjectWatcher`] keeps a [`KeyedWeakReference`] for every object handed to
//! it and schedules one check per registration on its
//! [`CheckRetainedExecutor`]. Every operation starts by draining the
//! [`ReferenceQueue`], so objects that were released are forgotten before
//! anything is counted or classified.
//!
//! # Lifecycle of a registration
//!
//! 1. `expect_weakly_reachable` stores a weak handle and schedules a check
//!    after the retained delay.
//! 2. If the last strong owner drops the object, the next drain removes the
//!    registration. The scheduled check then finds nothing and does nothing.
//! 3. If the object is still alive at check time, it is marked retained and
//!    every [`OnObjectRetainedListener`] is called once.
//! 4. A retained registration stays until its object is released or it is
//!    cleared, typically with [`ObjectWatcher::clear_objects_watched_before`]
//!    once a heap dump covered it.
//!
//! # Thread Safety
//!
//! All registry state lives behind one mutex. Critical sections are short
//! (drain plus a map update) and listeners are called after the lock was
//! released, so a listener may query the watcher it is registered on.
//! Lock poisoning is recovered from: the state is a plain map that stays
//! consistent between statements.

mod epoch;
mod key;
mod listener;
mod queue;
mod reference;

pub use epoch::HeapDumpEpoch;
pub use key::WatchKey;
pub use listener::OnObjectRetainedListener;
pub use queue::ReferenceQueue;
pub use reference::{KeyedWeakReference, Referent};

use crate::clock::{Clock, SystemClock};
use crate::config::{DEFAULT_CHECKER_THREAD_NAME, DEFAULT_RETAINED_DELAY_MS, WatcherConfig};
use crate::executor::{CheckRetainedExecutor, ThreadExecutor};
use crate::observability::{EventBus, WatcherEvent};
use crate::Result;
use listener::ListenerSet;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace};

/// Predicate deciding whether submissions are accepted.
pub type EnabledPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Converts usize to f64 for metrics, capping at `u32::MAX`.
#[inline]
fn usize_to_f64(value: usize) -> f64 {
    let capped = u32::try_from(value).unwrap_or(u32::MAX);
    f64::from(capped)
}

/// Ingestion contract for lifecycle adapters.
///
/// Adapters call this from whatever teardown hook they observe. The object is
/// expected to become unreachable shortly afterwards.
pub trait ReachabilityWatcher: Send + Sync {
    /// Expects `watched_object` to be released soon; reports it otherwise.
    fn expect_weakly_reachable(&self, watched_object: Arc<Referent>, description: &str);
}

impl<F> ReachabilityWatcher for F
where
    F: Fn(Arc<Referent>, &str) + Send + Sync,
{
    fn expect_weakly_reachable(&self, watched_object: Arc<Referent>, description: &str) {
        self(watched_object, description);
    }
}

/// Snapshot of one retained registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedObjectInfo {
    /// Registration key.
    pub key: WatchKey,
    /// Why the object was expected to become unreachable.
    pub description: String,
    /// Clock time at which watching started.
    pub watch_uptime_millis: u64,
    /// Clock time of the check that found the object alive.
    pub retained_uptime_millis: u64,
}

impl RetainedObjectInfo {
    /// How long the object had been retained at `heap_dump_uptime_millis`.
    #[must_use]
    pub const fn retained_duration_millis(&self, heap_dump_uptime_millis: u64) -> Option<u64> {
        heap_dump_uptime_millis.checked_sub(self.retained_uptime_millis)
    }
}

struct WatchState {
    watched_objects: HashMap<WatchKey, KeyedWeakReference>,
    queue: ReferenceQueue,
    listeners: ListenerSet,
}

impl WatchState {
    fn new() -> Self {
        Self {
            watched_objects: HashMap::new(),
            queue: ReferenceQueue::new(),
            listeners: ListenerSet::default(),
        }
    }

    /// Forgets every registration whose object was released.
    fn remove_weakly_reachable_objects(&mut self) -> usize {
        let mut removed = 0;
        for key in self.queue.drain() {
            if self.watched_objects.remove(&key).is_some() {
                trace!(key = %key, "Watched object reclaimed");
                removed += 1;
            }
        }
        if removed > 0 {
            metrics::counter!("leakwatch_objects_reclaimed_total")
                .increment(u64::try_from(removed).unwrap_or(u64::MAX));
            metrics::gauge!("leakwatch_watched_objects")
                .set(usize_to_f64(self.watched_objects.len()));
        }
        removed
    }

    fn retained_count(&self) -> usize {
        self.watched_objects
            .values()
            .filter(|reference| reference.is_retained())
            .count()
    }

    fn remove_where(&mut self, mut predicate: impl FnMut(&KeyedWeakReference) -> bool) -> usize {
        self.remove_weakly_reachable_objects();
        let keys: Vec<WatchKey> = self
            .watched_objects
            .values()
            .filter(|reference| predicate(reference))
            .map(|reference| reference.key().clone())
            .collect();

        for key in &keys {
            if let Some(mut reference) = self.watched_objects.remove(key) {
                reference.clear();
            }
            self.queue.unregister(key);
        }
        metrics::gauge!("leakwatch_watched_objects").set(usize_to_f64(self.watched_objects.len()));
        keys.len()
    }

    fn remove_all(&mut self) -> usize {
        self.remove_weakly_reachable_objects();
        let removed = self.watched_objects.len();
        for reference in self.watched_objects.values_mut() {
            reference.clear();
        }
        self.watched_objects.clear();
        self.queue.unregister_all();
        metrics::gauge!("leakwatch_watched_objects").set(0.0);
        removed
    }
}

struct Transition {
    description: String,
    retained_uptime_millis: u64,
    retained_count: usize,
    listeners: ListenerSet,
}

struct Shared {
    clock: Arc<dyn Clock>,
    is_enabled: EnabledPredicate,
    state: Mutex<WatchState>,
    heap_dump_epoch: HeapDumpEpoch,
    event_bus: Option<EventBus>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: WatcherEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    #[instrument(
        name = "leakwatch.watcher.check",
        skip(self, key),
        fields(key = %key, component = "watcher", operation = "move_to_retained")
    )]
    fn move_to_retained(&self, key: &WatchKey) {
        let start = Instant::now();
        let transition = self.classify(key);
        metrics::histogram!("leakwatch_retained_check_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        let Some(transition) = transition else {
            debug!("Watched object reclaimed before check");
            return;
        };

        info!(
            description = %transition.description,
            retained_count = transition.retained_count,
            "Watched object retained"
        );
        metrics::counter!("leakwatch_objects_retained_total").increment(1);
        self.publish(WatcherEvent::Retained {
            key: key.clone(),
            retained_uptime_millis: transition.retained_uptime_millis,
            retained_count: transition.retained_count,
        });

        transition.listeners.notify_all();
    }

    /// Marks `key` retained if it is still watched, under the lock.
    fn classify(&self, key: &WatchKey) -> Option<Transition> {
        let mut state = self.lock_state();
        state.remove_weakly_reachable_objects();

        let now = self.clock.uptime_millis();
        let reference = state.watched_objects.get_mut(key)?;
        if !reference.mark_retained(now) {
            return None;
        }
        let description = reference.description().to_string();

        Some(Transition {
            description,
            retained_uptime_millis: now,
            retained_count: state.retained_count(),
            listeners: state.listeners.clone(),
        })
    }
}

/// Watches objects that should become unreachable and reports those that
/// don't.
///
/// Cloning is cheap and yields a handle to the same registry.
///
/// # Example
///
/// ```rust
/// use leakwatch::{ManualClock, ManualExecutor, ObjectWatcher};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(ManualClock::new(0));
/// let executor = Arc::new(ManualExecutor::new());
/// let watcher = ObjectWatcher::new(clock.clone(), executor.clone(), Duration::from_secs(5));
///
/// let leaked = Arc::new(String::from("still referenced"));
/// let released = Arc::new(String::from("dropped"));
/// watcher.watch(&leaked, "kept alive by a cache");
/// watcher.watch(&released, "request finished");
/// drop(released);
///
/// clock.advance(Duration::from_secs(5));
/// executor.advance(Duration::from_secs(5));
///
/// assert_eq!(watcher.retained_object_count(), 1);
/// ```
#[derive(Clone)]
pub struct ObjectWatcher {
    shared: Arc<Shared>,
    executor: Arc<dyn CheckRetainedExecutor>,
    owns_executor: bool,
    retained_delay: Duration,
}

impl fmt::Debug for ObjectWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectWatcher")
            .field("retained_delay", &self.retained_delay)
            .field("owns_executor", &self.owns_executor)
            .finish_non_exhaustive()
    }
}

impl ObjectWatcher {
    /// Creates an always-enabled watcher.
    ///
    /// `executor` stays owned by the caller and may be shared with other
    /// watchers; [`shutdown`](Self::shutdown) leaves it running.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        executor: Arc<dyn CheckRetainedExecutor>,
        retained_delay: Duration,
    ) -> Self {
        Self::assemble(
            clock,
            executor,
            false,
            retained_delay,
            Arc::new(|| true),
            None,
        )
    }

    /// Starts building a watcher.
    #[must_use]
    pub fn builder() -> ObjectWatcherBuilder {
        ObjectWatcherBuilder::default()
    }

    /// Creates a watcher with a [`SystemClock`], a [`ThreadExecutor`] and an
    /// [`EventBus`] sized from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the checker thread
    /// cannot be spawned.
    pub fn from_config(config: &WatcherConfig) -> Result<Self> {
        config.validate()?;
        Self::builder()
            .enabled(config.enabled)
            .retained_delay(config.retained_delay())
            .checker_thread_name(config.checker_thread_name.clone())
            .event_bus(EventBus::new(config.event_bus_capacity))
            .build()
    }

    fn assemble(
        clock: Arc<dyn Clock>,
        executor: Arc<dyn CheckRetainedExecutor>,
        owns_executor: bool,
        retained_delay: Duration,
        is_enabled: EnabledPredicate,
        event_bus: Option<EventBus>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock,
                is_enabled,
                state: Mutex::new(WatchState::new()),
                heap_dump_epoch: HeapDumpEpoch::new(),
                event_bus,
            }),
            executor,
            owns_executor,
            retained_delay,
        }
    }

    /// Grace delay between a submission and its check.
    #[must_use]
    pub const fn retained_delay(&self) -> Duration {
        self.retained_delay
    }

    /// The attached event bus, if any.
    #[must_use]
    pub fn event_bus(&self) -> Option<&EventBus> {
        self.shared.event_bus.as_ref()
    }

    /// Expects `watched_object` to become unreachable soon.
    ///
    /// Ignored when the enable predicate returns `false`. Submitting the same
    /// object twice creates two independent registrations.
    pub fn expect_weakly_reachable(&self, watched_object: &Arc<Referent>, description: &str) {
        self.watch_weak(Arc::downgrade(watched_object), description);
    }

    /// Typed variant of [`expect_weakly_reachable`](Self::expect_weakly_reachable).
    pub fn watch<T>(&self, watched_object: &Arc<T>, description: &str)
    where
        T: Any + Send + Sync,
    {
        let weak = Arc::downgrade(watched_object);
        let referent: Weak<Referent> = weak;
        self.watch_weak(referent, description);
    }

    fn watch_weak(&self, referent: Weak<Referent>, description: &str) {
        if !(self.shared.is_enabled)() {
            trace!("Watcher disabled, ignoring object");
            return;
        }

        let key = WatchKey::generate();
        let watch_uptime_millis = {
            let mut state = self.shared.lock_state();
            state.remove_weakly_reachable_objects();

            let watch_uptime_millis = self.shared.clock.uptime_millis();
            let reference =
                KeyedWeakReference::new(referent, key.clone(), description, watch_uptime_millis);
            state.queue.register(key.clone(), reference.downgrade());
            state.watched_objects.insert(key.clone(), reference);
            metrics::gauge!("leakwatch_watched_objects")
                .set(usize_to_f64(state.watched_objects.len()));
            watch_uptime_millis
        };

        debug!(
            key = %key,
            description,
            delay_ms = self.retained_delay.as_millis(),
            "Watching object"
        );
        metrics::counter!("leakwatch_objects_watched_total").increment(1);
        self.shared.publish(WatcherEvent::Watched {
            key: key.clone(),
            description: description.to_string(),
            watch_uptime_millis,
        });

        let shared = Arc::downgrade(&self.shared);
        self.executor.execute_after(
            self.retained_delay,
            Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.move_to_retained(&key);
                }
            }),
        );
    }

    /// Whether any watched object was classified as retained.
    #[must_use]
    pub fn has_retained_objects(&self) -> bool {
        let mut state = self.shared.lock_state();
        state.remove_weakly_reachable_objects();
        state
            .watched_objects
            .values()
            .any(KeyedWeakReference::is_retained)
    }

    /// Number of watched objects classified as retained.
    #[must_use]
    pub fn retained_object_count(&self) -> usize {
        let mut state = self.shared.lock_state();
        state.remove_weakly_reachable_objects();
        state.retained_count()
    }

    /// Whether any object is watched, retained or not.
    #[must_use]
    pub fn has_watched_objects(&self) -> bool {
        let mut state = self.shared.lock_state();
        state.remove_weakly_reachable_objects();
        !state.watched_objects.is_empty()
    }

    /// Number of watched objects, retained or not.
    #[must_use]
    pub fn watched_object_count(&self) -> usize {
        let mut state = self.shared.lock_state();
        state.remove_weakly_reachable_objects();
        state.watched_objects.len()
    }

    /// Strong references to the retained objects.
    ///
    /// Release them quickly: holding on to them extends the very leaks being
    /// reported. Objects released between the drain and the upgrade are
    /// skipped.
    #[must_use]
    pub fn retained_objects(&self) -> Vec<Arc<Referent>> {
        let mut state = self.shared.lock_state();
        state.remove_weakly_reachable_objects();
        state
            .watched_objects
            .values()
            .filter(|reference| reference.is_retained())
            .filter_map(KeyedWeakReference::get)
            .collect()
    }

    /// Metadata of the retained registrations, oldest first.
    #[must_use]
    pub fn retained_object_infos(&self) -> Vec<RetainedObjectInfo> {
        let mut state = self.shared.lock_state();
        state.remove_weakly_reachable_objects();
        let mut infos: Vec<RetainedObjectInfo> = state
            .watched_objects
            .values()
            .filter_map(|reference| {
                reference
                    .retained_uptime_millis()
                    .map(|retained_uptime_millis| RetainedObjectInfo {
                        key: reference.key().clone(),
                        description: reference.description().to_string(),
                        watch_uptime_millis: reference.watch_uptime_millis(),
                        retained_uptime_millis,
                    })
            })
            .collect();
        infos.sort_by(|a, b| {
            a.watch_uptime_millis
                .cmp(&b.watch_uptime_millis)
                .then_with(|| a.key.cmp(&b.key))
        });
        infos
    }

    /// Clears every registration watched at or before `heap_dump_uptime_millis`.
    ///
    /// Returns the number of registrations removed.
    #[instrument(
        name = "leakwatch.watcher.clear_before",
        skip(self),
        fields(component = "watcher", operation = "clear_before")
    )]
    pub fn clear_objects_watched_before(&self, heap_dump_uptime_millis: u64) -> usize {
        let removed = self.shared.lock_state().remove_where(|reference| {
            reference.watch_uptime_millis() <= heap_dump_uptime_millis
        });

        debug!(removed, "Cleared watched objects");
        self.shared.publish(WatcherEvent::Cleared {
            removed,
            watched_before: Some(heap_dump_uptime_millis),
        });
        removed
    }

    /// Clears every registration.
    ///
    /// Returns the number of registrations removed.
    pub fn clear_watched_objects(&self) -> usize {
        let removed = self.shared.lock_state().remove_all();

        debug!(removed, "Cleared all watched objects");
        self.shared.publish(WatcherEvent::Cleared {
            removed,
            watched_before: None,
        });
        removed
    }

    /// Records the current clock time as the instant of a heap dump.
    ///
    /// Call right before taking the snapshot.
    pub fn mark_heap_dump(&self) -> u64 {
        self.shared.heap_dump_epoch.mark(self.shared.clock.as_ref())
    }

    /// Instant recorded by the last [`mark_heap_dump`](Self::mark_heap_dump).
    #[must_use]
    pub fn heap_dump_uptime_millis(&self) -> Option<u64> {
        self.shared.heap_dump_epoch.last()
    }

    /// Clears everything covered by the last marked heap dump.
    ///
    /// Does nothing if no dump was marked.
    pub fn clear_objects_watched_before_heap_dump(&self) -> usize {
        self.heap_dump_uptime_millis()
            .map_or(0, |epoch| self.clear_objects_watched_before(epoch))
    }

    /// Registers a listener. Adding the same instance twice has no effect.
    pub fn add_on_object_retained_listener(&self, listener: Arc<dyn OnObjectRetainedListener>) {
        self.shared.lock_state().listeners.add(listener);
    }

    /// Unregisters a listener instance.
    pub fn remove_on_object_retained_listener(&self, listener: &Arc<dyn OnObjectRetainedListener>) {
        self.shared.lock_state().listeners.remove(listener);
    }

    /// Forgets every registration and listener, and stops the checker thread
    /// if this watcher spawned it.
    ///
    /// An executor supplied by the caller keeps running; checks this watcher
    /// already scheduled on it find nothing and do nothing. Clones of this
    /// watcher keep working as a registry.
    pub fn shutdown(&self) {
        if self.owns_executor {
            self.executor.shutdown();
        }
        let (removed, listeners) = {
            let mut state = self.shared.lock_state();
            let listeners = std::mem::take(&mut state.listeners);
            (state.remove_all(), listeners.len())
        };
        info!(removed, listeners, "Object watcher shut down");
    }
}

impl ReachabilityWatcher for ObjectWatcher {
    fn expect_weakly_reachable(&self, watched_object: Arc<Referent>, description: &str) {
        self.watch_weak(Arc::downgrade(&watched_object), description);
    }
}

/// Builder for [`ObjectWatcher`].
pub struct ObjectWatcherBuilder {
    clock: Option<Arc<dyn Clock>>,
    executor: Option<Arc<dyn CheckRetainedExecutor>>,
    is_enabled: EnabledPredicate,
    retained_delay: Duration,
    checker_thread_name: String,
    event_bus: Option<EventBus>,
}

impl Default for ObjectWatcherBuilder {
    fn default() -> Self {
        Self {
            clock: None,
            executor: None,
            is_enabled: Arc::new(|| true),
            retained_delay: Duration::from_millis(DEFAULT_RETAINED_DELAY_MS),
            checker_thread_name: DEFAULT_CHECKER_THREAD_NAME.to_string(),
            event_bus: None,
        }
    }
}

impl ObjectWatcherBuilder {
    /// Sets the clock. Defaults to a [`SystemClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the executor. Defaults to a new [`ThreadExecutor`].
    ///
    /// A supplied executor is not shut down with the watcher.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn CheckRetainedExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Accepts submissions only while `predicate` returns `true`.
    #[must_use]
    pub fn enabled_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.is_enabled = Arc::new(predicate);
        self
    }

    /// Enables or disables the watcher permanently.
    #[must_use]
    pub fn enabled(self, enabled: bool) -> Self {
        self.enabled_when(move || enabled)
    }

    /// Sets the grace delay before each check.
    #[must_use]
    pub const fn retained_delay(mut self, delay: Duration) -> Self {
        self.retained_delay = delay;
        self
    }

    /// Names the checker thread when no executor is supplied.
    #[must_use]
    pub fn checker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.checker_thread_name = name.into();
        self
    }

    /// Publishes watcher events on `bus`.
    #[must_use]
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Builds the watcher.
    ///
    /// # Errors
    ///
    /// Returns an error if no executor was supplied and the checker thread
    /// cannot be spawned.
    pub fn build(self) -> Result<ObjectWatcher> {
        let (executor, owns_executor): (Arc<dyn CheckRetainedExecutor>, bool) = match self.executor
        {
            Some(executor) => (executor, false),
            None => (Arc::new(ThreadExecutor::spawn(self.checker_thread_name)?), true),
        };
        let clock = self
            .clock
            .unwrap_or_else(|| -> Arc<dyn Clock> { Arc::new(SystemClock::new()) });

        Ok(ObjectWatcher::assemble(
            clock,
            executor,
            owns_executor,
            self.retained_delay,
            self.is_enabled,
            self.event_bus,
        ))
    }
}
