//! Event delivery to subscribers.
//!
//! Every appended [`ContractEvent`] is pushed to all current subscribers:
//! channel receivers obtained from [`EventBus::subscribe`] and callback sinks
//! added with [`EventBus::add_sink`]. The registry publishes while it still
//! holds the contract's lock, so each subscriber sees a contract's events in
//! log order. No order is promised across contracts.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use accord_core::ContractEvent;

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub Uuid);

/// Callback subscriber. Must not block; hand work off to a task if needed.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &ContractEvent);
}

#[derive(Clone)]
enum Subscriber {
    Channel(mpsc::UnboundedSender<ContractEvent>),
    Sink(Arc<dyn EventSink>),
}

#[derive(Default)]
pub struct EventBus {
    subscribers: DashMap<SubscriberId, Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel subscriber.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<ContractEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriberId(Uuid::new_v4());
        self.subscribers.insert(id, Subscriber::Channel(tx));
        (id, rx)
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) -> SubscriberId {
        let id = SubscriberId(Uuid::new_v4());
        self.subscribers.insert(id, Subscriber::Sink(sink));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Delivers `event` to every subscriber.
    ///
    /// Handles are copied out of the map first, so a sink may subscribe or
    /// unsubscribe from inside `deliver`.
    pub fn publish(&self, event: &ContractEvent) {
        let subscribers: Vec<(SubscriberId, Subscriber)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut closed = Vec::new();
        for (id, subscriber) in subscribers {
            match subscriber {
                Subscriber::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(id);
                    }
                }
                Subscriber::Sink(sink) => sink.deliver(event),
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
            debug!(subscriber = %id.0, "dropped closed event subscriber");
        }
    }
}

/// Sink that writes every event to the tracing log.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn deliver(&self, event: &ContractEvent) {
        info!(
            contract_id = %event.contract_id,
            sequence = event.sequence,
            version = event.contract_version,
            actor = %event.actor,
            kind = event.kind.label(),
            "contract event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::EventKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<u64>>);

    impl EventSink for Collect {
        fn deliver(&self, event: &ContractEvent) {
            self.0.lock().unwrap().push(event.sequence);
        }
    }

    /// Subscribes a fresh channel from inside every delivery.
    struct Resubscribe {
        bus: Arc<EventBus>,
        added: Mutex<Vec<SubscriberId>>,
    }

    impl EventSink for Resubscribe {
        fn deliver(&self, _event: &ContractEvent) {
            let (id, _rx) = self.bus.subscribe();
            self.added.lock().unwrap().push(id);
        }
    }

    fn event(sequence: u64) -> ContractEvent {
        ContractEvent::new("C1".into(), sequence, 1, "p".into(), EventKind::Registered)
    }

    #[tokio::test]
    async fn channel_and_sink_both_receive() {
        let bus = EventBus::new();
        let (_, mut rx) = bus.subscribe();
        let sink = Arc::new(Collect::default());
        bus.add_sink(sink.clone());

        bus.publish(&event(1));
        bus.publish(&event(2));

        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(rx.recv().await.unwrap().sequence, 2);
        assert_eq!(*sink.0.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn closed_channels_are_pruned() {
        let bus = EventBus::new();
        let (_, rx) = bus.subscribe();
        drop(rx);
        bus.publish(&event(1));
        assert!(bus.is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let sink = Arc::new(Collect::default());
        let id = bus.add_sink(sink.clone());
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&event(1));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn sink_may_subscribe_while_delivering() {
        let bus = Arc::new(EventBus::new());
        let sink = Arc::new(Resubscribe {
            bus: bus.clone(),
            added: Mutex::default(),
        });
        let sink_id = bus.add_sink(sink.clone());

        bus.publish(&event(1));
        assert_eq!(sink.added.lock().unwrap().len(), 1);
        assert_eq!(bus.len(), 2);

        // The first channel's receiver is gone and gets pruned; a new one
        // is added by the sink.
        bus.publish(&event(2));
        assert_eq!(sink.added.lock().unwrap().len(), 2);
        assert_eq!(bus.len(), 2);

        assert!(bus.unsubscribe(sink_id));
    }
}
