//! # Stratum Event Bus
//!
//! Topic-based publish/subscribe for trigger events. Topics are
//! `condition.{fingerprint}`; diagnostic subscribers may use
//! `condition.*` patterns.
//!
//! ## Delivery contract
//!
//! - At-least-once within a cycle; best-effort across process restarts
//!   (subscribers are idempotent on `(fingerprint, bar_close_time)`).
//! - Per subscriber, events arrive in publish order.
//! - Backpressure never reaches the publisher: each subscriber owns a
//!   bounded mailbox, and a full mailbox drops its *oldest undelivered*
//!   event and bumps that subscriber's `dropped_events` counter.
//!
//! The mailbox is a `VecDeque` + `Notify` pair rather than an `mpsc`
//! channel because drop-oldest requires popping the queue head, which a
//! channel sender cannot do.

pub mod error;
pub mod mailbox;

pub use error::BusError;
pub use mailbox::{EventReceiver, Mailbox};

use core_types::TriggerEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An opaque ticket identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Debug, Clone)]
enum Selector {
    Exact(String),
    /// Matches every topic under a prefix (`condition.*` -> `condition.`).
    Prefix(String),
    All,
}

impl Selector {
    fn matches(&self, topic: &str) -> bool {
        match self {
            Selector::Exact(t) => t == topic,
            Selector::Prefix(p) => topic.starts_with(p.as_str()),
            Selector::All => true,
        }
    }
}

struct SubscriberEntry {
    selector: Selector,
    mailbox: Arc<Mailbox>,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscribers: HashMap<u64, SubscriberEntry>,
}

/// The multi-writer, multi-reader hub. Cloning shares the same state, so
/// the evaluator can publish while the notifier manages subscriptions.
#[derive(Clone)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
    capacity: usize,
}

impl EventBus {
    /// Creates a bus whose subscriber mailboxes hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            capacity: capacity.max(1),
        }
    }

    fn add(&self, selector: Selector) -> (SubscriptionHandle, EventReceiver) {
        let mailbox = Arc::new(Mailbox::new(self.capacity));
        let receiver = EventReceiver::new(Arc::clone(&mailbox));

        let mut state = self.state.lock().expect("bus mutex");
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, SubscriberEntry { selector, mailbox });

        (SubscriptionHandle(id), receiver)
    }

    /// Subscribes to a single topic.
    pub fn subscribe(&self, topic: &str) -> (SubscriptionHandle, EventReceiver) {
        self.add(Selector::Exact(topic.to_string()))
    }

    /// Subscribes to a topic pattern. Accepted shapes: `*` (everything)
    /// and `prefix.*`.
    pub fn psubscribe(
        &self,
        pattern: &str,
    ) -> Result<(SubscriptionHandle, EventReceiver), BusError> {
        let selector = if pattern == "*" {
            Selector::All
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            if prefix.is_empty() || prefix.contains('*') {
                return Err(BusError::InvalidPattern(pattern.to_string()));
            }
            Selector::Prefix(format!("{prefix}."))
        } else {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        };
        Ok(self.add(selector))
    }

    /// Removes a subscription and closes its receiver.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let entry = {
            let mut state = self.state.lock().expect("bus mutex");
            state.subscribers.remove(&handle.0)
        };
        if let Some(entry) = entry {
            entry.mailbox.close();
        }
    }

    /// Delivers an event to every matching mailbox. Never blocks; returns
    /// the number of subscribers reached.
    pub fn publish(&self, topic: &str, event: &TriggerEvent) -> usize {
        let mailboxes: Vec<Arc<Mailbox>> = {
            let state = self.state.lock().expect("bus mutex");
            state
                .subscribers
                .values()
                .filter(|entry| entry.selector.matches(topic))
                .map(|entry| Arc::clone(&entry.mailbox))
                .collect()
        };

        for mailbox in &mailboxes {
            mailbox.push(event.clone());
        }
        mailboxes.len()
    }

    /// Events dropped for one subscriber because its mailbox was full.
    pub fn dropped_events(&self, handle: SubscriptionHandle) -> u64 {
        let state = self.state.lock().expect("bus mutex");
        state
            .subscribers
            .get(&handle.0)
            .map(|entry| entry.mailbox.dropped())
            .unwrap_or(0)
    }

    /// Current number of subscriptions (for diagnostics and tests).
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().expect("bus mutex").subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_types::Timeframe;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn event(fingerprint: &str, seq: i64) -> TriggerEvent {
        let mut values = BTreeMap::new();
        values.insert("seq".to_string(), seq as f64);
        TriggerEvent {
            event_id: Uuid::new_v4(),
            fingerprint: fingerprint.to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            triggered_at: Utc::now(),
            bar_close_time: Utc::now() + chrono::Duration::seconds(seq),
            values,
        }
    }

    #[tokio::test]
    async fn exact_subscription_receives_in_publish_order() {
        let bus = EventBus::new(16);
        let (_handle, rx) = bus.subscribe("condition.abc");

        for i in 0..5 {
            bus.publish("condition.abc", &event("abc", i));
        }
        bus.publish("condition.other", &event("other", 0));

        for i in 0..5 {
            let e = rx.recv().await.unwrap();
            assert_eq!(e.values.get("seq"), Some(&(i as f64)));
            assert_eq!(e.fingerprint, "abc");
        }
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn pattern_subscriber_sees_all_condition_topics() {
        let bus = EventBus::new(16);
        let (_handle, rx) = bus.psubscribe("condition.*").unwrap();

        bus.publish("condition.aaa", &event("aaa", 1));
        bus.publish("condition.bbb", &event("bbb", 2));

        assert_eq!(rx.recv().await.unwrap().fingerprint, "aaa");
        assert_eq!(rx.recv().await.unwrap().fingerprint, "bbb");
    }

    #[test]
    fn bad_patterns_are_rejected() {
        let bus = EventBus::new(4);
        assert!(bus.psubscribe("condition.**").is_err());
        assert!(bus.psubscribe("condition").is_err());
        assert!(bus.psubscribe(".*").is_err());
        assert!(bus.psubscribe("*").is_ok());
    }

    #[tokio::test]
    async fn full_mailbox_drops_the_oldest_event() {
        let bus = EventBus::new(2);
        let (handle, rx) = bus.subscribe("condition.x");

        bus.publish("condition.x", &event("x", 1));
        bus.publish("condition.x", &event("x", 2));
        bus.publish("condition.x", &event("x", 3)); // evicts seq 1

        assert_eq!(bus.dropped_events(handle), 1);
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        // The two newest survived, still in order.
        assert!(first.bar_close_time < second.bar_close_time);
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_receiver() {
        let bus = EventBus::new(4);
        let (handle, rx) = bus.subscribe("condition.y");
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(handle);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(rx.recv().await.is_none());

        // Publishing after unsubscribe reaches nobody.
        assert_eq!(bus.publish("condition.y", &event("y", 1)), 0);
    }

    #[tokio::test]
    async fn delivery_is_a_subsequence_of_the_published_sequence() {
        let bus = EventBus::new(3);
        let (_handle, rx) = bus.subscribe("condition.z");

        let published: Vec<i64> = (0..10).collect();
        for &i in &published {
            bus.publish("condition.z", &event("z", i));
        }

        let mut delivered = Vec::new();
        while let Some(e) = rx.try_recv() {
            delivered.push(e.bar_close_time);
        }
        // In order, no duplicates, and bounded by capacity.
        assert!(delivered.len() <= 3);
        for pair in delivered.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
