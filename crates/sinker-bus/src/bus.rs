//! The in-process topic bus.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use sinker_core::{models::LifecycleMessage, time::Clock, RealClock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::message::{BusMessage, Topic};

/// Per-topic publish order and subscriber set.
struct TopicState {
    next_offset: u64,
    groups: HashMap<String, UnboundedSender<BusMessage>>,
}

impl TopicState {
    fn new() -> Self {
        Self { next_offset: 0, groups: HashMap::new() }
    }
}

/// In-process topic bus with consumer-group fan-out.
///
/// A message published on a topic is copied once into every subscribed
/// group's queue, so each group processes it independently, the same
/// contract as a broker with one consumer per group. Queues are unbounded;
/// backpressure is not modeled.
///
/// Publishing is fire-and-forget: completion is logged with the topic, key
/// and assigned offset, but callers never await anything and a missing
/// subscriber never propagates as an error. Durable state stays the source
/// of truth; a dropped message degrades latency, not correctness.
pub struct EventBus {
    topics: Mutex<HashMap<Topic, TopicState>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates an empty bus stamping messages from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { topics: Mutex::new(HashMap::new()), clock }
    }

    /// Registers a consumer group on a topic and returns its queue.
    ///
    /// Messages published before the subscription are not replayed.
    /// Re-subscribing an existing group replaces the previous queue; the
    /// old receiver runs dry and its worker stops.
    pub fn subscribe(&self, topic: Topic, group: &str) -> UnboundedReceiver<BusMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut topics = self.lock_topics();
        let state = topics.entry(topic).or_insert_with(TopicState::new);
        if state.groups.insert(group.to_string(), sender).is_some() {
            warn!(topic = %topic, group, "consumer group re-subscribed, replacing previous queue");
        }

        debug!(topic = %topic, group, "consumer group subscribed");
        receiver
    }

    /// Publishes a message, fanning a copy out to every subscribed group.
    ///
    /// Returns the offset assigned within the topic.
    pub fn publish(&self, topic: Topic, key: &str, payload: Bytes) -> u64 {
        let published_at = self.clock.now_utc();

        let mut topics = self.lock_topics();
        let state = topics.entry(topic).or_insert_with(TopicState::new);
        let offset = state.next_offset;
        state.next_offset += 1;

        let message =
            BusMessage { topic, key: key.to_string(), payload, offset, published_at };

        // A send failure means the group's worker is gone; prune it so the
        // queue does not accumulate silently.
        state.groups.retain(|group, sender| {
            if sender.send(message.clone()).is_ok() {
                true
            } else {
                warn!(topic = %topic, group, "consumer group queue closed, dropping group");
                false
            }
        });

        debug!(
            topic = %topic,
            key,
            offset,
            groups = state.groups.len(),
            "message published"
        );

        offset
    }

    /// Serializes and publishes a lifecycle message, keyed by its event id.
    ///
    /// Encoding failures are logged and swallowed; lifecycle traffic never
    /// blocks or fails the state change that produced it.
    pub fn publish_lifecycle(&self, topic: Topic, message: &LifecycleMessage) {
        match serde_json::to_vec(message) {
            Ok(payload) => {
                self.publish(topic, &message.event_id.to_string(), Bytes::from(payload));
            },
            Err(error) => {
                warn!(
                    topic = %topic,
                    event_id = %message.event_id,
                    error = %error,
                    "failed to encode lifecycle message, dropping"
                );
            },
        }
    }

    /// Number of groups currently subscribed to a topic.
    pub fn group_count(&self, topic: Topic) -> usize {
        self.lock_topics().get(&topic).map_or(0, |state| state.groups.len())
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<Topic, TopicState>> {
        // Publishing never holds the lock across an await, so a poisoned
        // lock only means a panicking publisher; the map itself stays valid.
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Arc::new(RealClock))
    }
}
