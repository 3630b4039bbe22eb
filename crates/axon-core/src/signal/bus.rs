//! In-process signal bus: schema-checked publish, per-subscriber mailboxes,
//! bounded per-topic replay.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::error::SignalResult;
use super::registry::TopicRegistry;
use super::schema::JsonMap;
use crate::metrics::METRICS;
use crate::obs;

const DEFAULT_REPLAY_CAPACITY: usize = 100;

/// One validated, timestamped message. Serializes to the external wire shape
/// `{id, type, source, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    #[serde(rename = "type")]
    pub wire_type: String,
    pub source: String,
    pub data: JsonMap,
    pub timestamp: DateTime<Utc>,
}

/// Inbound wire signal; everything but `type` and `data` is optional.
#[derive(Debug, Deserialize)]
struct WireSignal {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    wire_type: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub source: Option<String>,
    pub id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PublishOptions {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Keep only the most recent `limit` signals (still oldest-first).
    pub limit: Option<usize>,
    /// Keep only signals stamped at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub replay_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A subscriber's own mailbox for one topic.
///
/// Dropping it ends the subscription; the bus prunes it on the next publish.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: String,
    receiver: mpsc::UnboundedReceiver<Signal>,
}

impl Subscription {
    /// Next signal, or `None` once the subscription was removed.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Signal> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Default)]
struct TopicState {
    history: VecDeque<Signal>,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<Signal>)>,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, TopicState>,
    subscriptions: HashMap<SubscriptionId, String>,
}

/// Strictly in-process fan-out bus.
///
/// `publish` never waits on subscribers: each one owns an unbounded mailbox.
/// Within a topic every subscriber observes signals in publish order.
pub struct SignalBus {
    registry: Arc<TopicRegistry>,
    config: BusConfig,
    state: Mutex<BusState>,
    next_id: AtomicU64,
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBus")
            .field("config", &self.config)
            .field("subscriptions", &self.lock().subscriptions.len())
            .finish()
    }
}

impl SignalBus {
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self::with_config(registry, BusConfig::default())
    }

    pub fn with_config(registry: Arc<TopicRegistry>, config: BusConfig) -> Self {
        Self {
            registry,
            config,
            state: Mutex::new(BusState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Validate `data` against the topic schema and fan it out.
    ///
    /// On error nothing is recorded and nothing is delivered.
    pub fn publish(&self, topic: &str, data: Value, opts: PublishOptions) -> SignalResult<Signal> {
        let validated = self
            .registry
            .get(topic)
            .and_then(|t| Ok((t.wire_type.clone(), t.schema.validate(&t.name, &data)?)));
        let (wire_type, data) = match validated {
            Ok(v) => v,
            Err(err) => {
                METRICS.inc_signals_rejected();
                obs::emit_signal_rejected(topic, &err);
                return Err(err);
            }
        };

        let signal = Signal {
            id: opts.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            wire_type,
            source: opts.source.unwrap_or_else(|| "axon".to_string()),
            data,
            timestamp: opts.timestamp.unwrap_or_else(Utc::now),
        };

        let delivered = {
            let mut state = self.lock();
            let entry = state.topics.entry(topic.to_string()).or_default();
            entry.history.push_back(signal.clone());
            while entry.history.len() > self.config.replay_capacity {
                entry.history.pop_front();
            }

            let mut dead = Vec::new();
            entry.subscribers.retain(|(id, tx)| {
                let alive = tx.send(signal.clone()).is_ok();
                if !alive {
                    dead.push(*id);
                }
                alive
            });
            let delivered = entry.subscribers.len();
            for id in dead {
                debug!(subscription = %id, topic = %topic, "Pruned closed subscription");
                state.subscriptions.remove(&id);
            }
            delivered
        };

        METRICS.inc_signals_published();
        obs::emit_signal_published(topic, &signal.id, &signal.source, delivered);
        Ok(signal)
    }

    /// Accept a signal in the external wire shape, keeping its id, source and timestamp.
    pub fn ingest(&self, wire: Value) -> SignalResult<Signal> {
        let wire: WireSignal = serde_json::from_value(wire)?;
        let topic = self.registry.topic_from_type(&wire.wire_type)?;
        let data = if wire.data.is_null() {
            Value::Object(JsonMap::new())
        } else {
            wire.data
        };
        self.publish(
            &topic.name,
            data,
            PublishOptions {
                source: wire.source,
                id: wire.id,
                timestamp: wire.timestamp,
            },
        )
    }

    /// Subscribe with a fresh mailbox.
    pub fn subscribe(&self, topic: &str) -> SignalResult<Subscription> {
        let (tx, receiver) = mpsc::unbounded_channel();
        let id = self.subscribe_into(topic, tx)?;
        Ok(Subscription {
            id,
            topic: topic.to_string(),
            receiver,
        })
    }

    /// Subscribe an existing mailbox, so one consumer can own several topics.
    pub fn subscribe_into(
        &self,
        topic: &str,
        sender: mpsc::UnboundedSender<Signal>,
    ) -> SignalResult<SubscriptionId> {
        self.registry.get(topic)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.lock();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .push((id, sender));
        state.subscriptions.insert(id, topic.to_string());
        debug!(subscription = %id, topic = %topic, "Subscribed");
        Ok(id)
    }

    /// Remove a subscription. Unknown or already-pruned ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let Some(topic) = state.subscriptions.remove(&id) else {
            return false;
        };
        if let Some(entry) = state.topics.get_mut(&topic) {
            entry.subscribers.retain(|(sid, _)| *sid != id);
        }
        true
    }

    /// Whether `id` is still attached to the bus.
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.lock().subscriptions.contains_key(&id)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.subscribers.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Buffered history for `topic`, oldest first.
    pub fn replay(&self, topic: &str, opts: ReplayOptions) -> Vec<Signal> {
        let state = self.lock();
        let Some(entry) = state.topics.get(topic) else {
            return Vec::new();
        };
        let mut signals: Vec<Signal> = entry
            .history
            .iter()
            .filter(|s| opts.since.map_or(true, |since| s.timestamp >= since))
            .cloned()
            .collect();
        if let Some(limit) = opts.limit {
            let skip = signals.len().saturating_sub(limit);
            signals.drain(..skip);
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::registry::Topic;
    use crate::signal::schema::{FieldType, PayloadSchema};
    use crate::signal::SignalError;
    use serde_json::json;

    fn bus_with_capacity(capacity: usize) -> SignalBus {
        let registry = Arc::new(TopicRegistry::new());
        registry
            .register(Topic::new(
                "review.request",
                "review.request",
                PayloadSchema::any().required("files_changed", FieldType::Integer),
            ))
            .unwrap();
        registry
            .register(Topic::new("review.result", "review.result", PayloadSchema::any()))
            .unwrap();
        SignalBus::with_config(
            registry,
            BusConfig {
                replay_capacity: capacity,
            },
        )
    }

    #[test]
    fn replay_evicts_oldest_first() {
        let bus = bus_with_capacity(2);
        for n in 1..=3 {
            bus.publish("review.request", json!({"files_changed": n}), PublishOptions::default())
                .unwrap();
        }
        let replay = bus.replay("review.request", ReplayOptions::default());
        let ns: Vec<_> = replay.iter().map(|s| s.data["files_changed"].clone()).collect();
        assert_eq!(ns, vec![json!(2), json!(3)]);
    }

    #[test]
    fn replay_limit_and_since() {
        let bus = bus_with_capacity(10);
        let early = Utc::now() - chrono::Duration::minutes(5);
        bus.publish(
            "review.request",
            json!({"files_changed": 1}),
            PublishOptions {
                timestamp: Some(early),
                ..Default::default()
            },
        )
        .unwrap();
        for n in 2..=4 {
            bus.publish("review.request", json!({"files_changed": n}), PublishOptions::default())
                .unwrap();
        }

        let last_two = bus.replay(
            "review.request",
            ReplayOptions {
                limit: Some(2),
                since: None,
            },
        );
        assert_eq!(last_two[0].data["files_changed"], json!(3));
        assert_eq!(last_two[1].data["files_changed"], json!(4));

        let recent = bus.replay(
            "review.request",
            ReplayOptions {
                limit: None,
                since: Some(early + chrono::Duration::seconds(1)),
            },
        );
        assert_eq!(recent.len(), 3);
    }

    #[test]
    fn invalid_payload_is_not_recorded() {
        let bus = bus_with_capacity(10);
        let err = bus
            .publish("review.request", json!({"files_changed": "lots"}), PublishOptions::default())
            .unwrap_err();
        assert!(matches!(err, SignalError::Validation(_)));
        assert!(bus.replay("review.request", ReplayOptions::default()).is_empty());
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let bus = bus_with_capacity(10);
        let sub = bus.subscribe("review.result").unwrap();
        let id = sub.id;
        drop(sub);
        bus.publish("review.result", json!({}), PublishOptions::default())
            .unwrap();
        assert!(!bus.is_subscribed(id));
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn subscribing_to_unknown_topic_fails() {
        let bus = bus_with_capacity(10);
        assert!(matches!(
            bus.subscribe("nope"),
            Err(SignalError::UnknownTopic { .. })
        ));
    }
}
