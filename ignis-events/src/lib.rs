//! Pub/sub store capability for Ignis.
//!
//! The realtime layer scales across instances through this interface.
//! Concrete stores (e.g. a Redis adapter) live outside the core; the
//! in-process [`LocalPubSub`] serves single-instance deployments and
//! tests. Publisher and subscriber sides are independent handles: taking
//! a subscription never consumes the parent store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use ignis_core::IgnisError;

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

/// Receiving end of a channel or pattern subscription.
pub struct Subscription {
    rx: mpsc::Receiver<PubSubMessage>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<PubSubMessage>) -> Self {
        Self { rx }
    }

    /// Next message, or `None` once the store drops the subscription.
    pub async fn recv(&mut self) -> Option<PubSubMessage> {
        self.rx.recv().await
    }
}

/// The pub/sub capability: publish, subscribe, pattern-subscribe.
#[async_trait]
pub trait PubSubStore: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), IgnisError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, IgnisError>;

    /// Subscribe to every channel matching `pattern` (`*` wildcard).
    async fn psubscribe(&self, pattern: &str) -> Result<Subscription, IgnisError>;
}

/// Match a channel against a pattern where `*` spans any substring.
pub fn pattern_matches(pattern: &str, channel: &str) -> bool {
    fn matches(p: &[u8], c: &[u8]) -> bool {
        match (p.first(), c.first()) {
            (None, None) => true,
            (Some(b'*'), _) => matches(&p[1..], c) || (!c.is_empty() && matches(p, &c[1..])),
            (Some(pc), Some(cc)) if pc == cc => matches(&p[1..], &c[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), channel.as_bytes())
}

enum Topic {
    Channel(String),
    Pattern(String),
}

impl Topic {
    fn accepts(&self, channel: &str) -> bool {
        match self {
            Topic::Channel(name) => name == channel,
            Topic::Pattern(pattern) => pattern_matches(pattern, channel),
        }
    }
}

struct Subscriber {
    topic: Topic,
    tx: mpsc::Sender<PubSubMessage>,
}

/// In-process pub/sub store.
///
/// Delivery is per-subscriber FIFO over a bounded queue; a subscriber
/// that falls behind loses the overflowing message rather than blocking
/// the publisher.
#[derive(Clone, Default)]
pub struct LocalPubSub {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

const SUBSCRIPTION_CAPACITY: usize = 1024;

impl LocalPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.subscribers
            .lock()
            .expect("subscribers lock poisoned")
            .push(Subscriber { topic, tx });
        Subscription::new(rx)
    }
}

#[async_trait]
impl PubSubStore for LocalPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), IgnisError> {
        let mut subscribers = self.subscribers.lock().expect("subscribers lock poisoned");
        subscribers.retain(|sub| !sub.tx.is_closed());
        for sub in subscribers.iter() {
            if !sub.topic.accepts(channel) {
                continue;
            }
            let message = PubSubMessage {
                channel: channel.to_string(),
                payload: payload.to_string(),
            };
            if let Err(err) = sub.tx.try_send(message) {
                warn!(channel = %channel, error = %err, "pub/sub subscriber lagging, message dropped");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, IgnisError> {
        Ok(self.add(Topic::Channel(channel.to_string())))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<Subscription, IgnisError> {
        Ok(self.add(Topic::Pattern(pattern.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_match_prefix_wildcards() {
        assert!(pattern_matches("ws:room:*", "ws:room:game-1"));
        assert!(pattern_matches("ws:*", "ws:broadcast"));
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("ws:room:game-1", "ws:room:game-1"));
        assert!(!pattern_matches("ws:room:*", "ws:user:u1"));
        assert!(!pattern_matches("ws:room:*", "ws:room"));
    }

    #[tokio::test]
    async fn subscribe_receives_published_messages() {
        let bus = LocalPubSub::new();
        let mut sub = bus.subscribe("ws:broadcast").await.unwrap();
        bus.publish("ws:broadcast", r#"{"event":"x"}"#).await.unwrap();
        let message = sub.recv().await.unwrap();
        assert_eq!(message.channel, "ws:broadcast");
        assert_eq!(message.payload, r#"{"event":"x"}"#);
    }

    #[tokio::test]
    async fn pattern_subscription_sees_matching_channels_only() {
        let bus = LocalPubSub::new();
        let mut rooms = bus.psubscribe("ws:room:*").await.unwrap();
        bus.publish("ws:room:game-1", "a").await.unwrap();
        bus.publish("ws:user:u1", "b").await.unwrap();
        bus.publish("ws:room:game-2", "c").await.unwrap();

        assert_eq!(rooms.recv().await.unwrap().channel, "ws:room:game-1");
        assert_eq!(rooms.recv().await.unwrap().channel, "ws:room:game-2");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = LocalPubSub::new();
        let mut a = bus.subscribe("events").await.unwrap();
        let mut b = bus.subscribe("events").await.unwrap();
        bus.publish("events", "payload").await.unwrap();
        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn publisher_handle_is_not_consumed_by_subscribing() {
        let bus = LocalPubSub::new();
        let publisher = bus.clone();
        let mut sub = bus.subscribe("events").await.unwrap();
        publisher.publish("events", "one").await.unwrap();
        publisher.publish("events", "two").await.unwrap();
        assert_eq!(sub.recv().await.unwrap().payload, "one");
        assert_eq!(sub.recv().await.unwrap().payload, "two");
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let bus = LocalPubSub::new();
        let sub = bus.subscribe("events").await.unwrap();
        drop(sub);
        bus.publish("events", "x").await.unwrap();
        assert!(bus.subscribers.lock().unwrap().is_empty());
    }
}
