//! Tokio broadcast event bus for watcher notifications.
//!
//! Listeners registered on the watcher run synchronously on the checker
//! thread. Async consumers subscribe here instead.

use crate::watcher::WatchKey;
use tokio::sync::broadcast;

/// Events emitted by a watcher with an attached bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// An object started being watched.
    Watched {
        /// Registration key.
        key: WatchKey,
        /// Why the object should become unreachable.
        description: String,
        /// Clock time of the registration.
        watch_uptime_millis: u64,
    },
    /// A watched object outlived its grace delay.
    Retained {
        /// Registration key.
        key: WatchKey,
        /// Clock time of the check.
        retained_uptime_millis: u64,
        /// Retained objects known after this transition.
        retained_count: usize,
    },
    /// Registrations were cleared explicitly.
    Cleared {
        /// Number of registrations removed.
        removed: usize,
        /// Cutoff used, `None` when everything was cleared.
        watched_before: Option<u64>,
    },
}

impl WatcherEvent {
    /// Returns the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Watched { .. } => "watched",
            Self::Retained { .. } => "retained",
            Self::Cleared { .. } => "cleared",
        }
    }
}

/// Broadcast bus for [`WatcherEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WatcherEvent>,
}

/// Filtered receiver that yields events matching a predicate.
pub struct FilteredReceiver<F> {
    receiver: broadcast::Receiver<WatcherEvent>,
    predicate: F,
}

impl EventBus {
    /// Creates a new event bus with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers (best effort).
    pub fn publish(&self, event: WatcherEvent) {
        metrics::counter!("leakwatch_event_bus_publish_total", "event" => event.event_type())
            .increment(1);
        // No subscribers is not an error for a best-effort bus.
        let _ = self.sender.send(event);
    }

    /// Subscribes to the event bus.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribes with a predicate to filter events.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, predicate: F) -> FilteredReceiver<F>
    where
        F: Fn(&WatcherEvent) -> bool,
    {
        FilteredReceiver {
            receiver: self.sender.subscribe(),
            predicate,
        }
    }

    /// Subscribes to events matching the provided event type.
    #[must_use]
    pub fn subscribe_event_type(
        &self,
        event_type: &'static str,
    ) -> FilteredReceiver<impl Fn(&WatcherEvent) -> bool> {
        self.subscribe_filtered(move |event| event.event_type() == event_type)
    }
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&WatcherEvent) -> bool,
{
    /// Receives the next event that matches the predicate.
    pub async fn recv(&mut self) -> Result<WatcherEvent, broadcast::error::RecvError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.predicate)(&event) {
                        return Ok(event);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::counter!("leakwatch_event_bus_lagged_total").increment(skipped);
                },
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_filtered_skips_non_matching() {
        let bus = EventBus::new(16);
        let mut filtered = bus.subscribe_event_type("retained");

        bus.publish(WatcherEvent::Watched {
            key: WatchKey::from("k1"),
            description: "closed".into(),
            watch_uptime_millis: 1,
        });
        bus.publish(WatcherEvent::Retained {
            key: WatchKey::from("k1"),
            retained_uptime_millis: 5001,
            retained_count: 1,
        });

        let event = filtered.recv().await.expect("receive event");
        assert_eq!(event.event_type(), "retained");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        assert_eq!(bus.receiver_count(), 0);
        bus.publish(WatcherEvent::Cleared {
            removed: 0,
            watched_before: None,
        });

        let mut receiver = bus.subscribe();
        bus.publish(WatcherEvent::Cleared {
            removed: 2,
            watched_before: Some(10),
        });
        let event = receiver.recv().await.expect("receive event");
        assert_eq!(
            event,
            WatcherEvent::Cleared {
                removed: 2,
                watched_before: Some(10),
            }
        );
    }
}
