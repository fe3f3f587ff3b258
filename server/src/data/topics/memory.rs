//! In-memory topic backend
//!
//! A `VecDeque` per stream with simulated consumer groups. Each group keeps
//! a delivery cursor, so consumers of one group share the messages while
//! separate groups each see every message.
//!
//! Process exit loses every message; use the Redis backend when the
//! producer and the persist consumer run in separate processes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;

use super::backend::{StreamMessage, StreamSubscription, TopicBackend};
use super::error::TopicError;

/// Stream max length, trimmed on publish
const DEFAULT_STREAM_MAX_LEN: usize = 100_000;

struct StreamEntry {
    id: u64,
    payload: Vec<u8>,
}

#[derive(Default)]
struct ConsumerGroup {
    /// Highest ID handed to any consumer of the group
    last_delivered: u64,
    /// Delivered but not yet acknowledged: message_id -> (consumer, delivery_time)
    pending: HashMap<u64, (String, Instant)>,
}

struct StreamState {
    messages: VecDeque<StreamEntry>,
    groups: HashMap<String, ConsumerGroup>,
    next_id: u64,
    max_len: usize,
}

impl StreamState {
    fn new(max_len: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            groups: HashMap::new(),
            next_id: 1,
            max_len,
        }
    }

    fn trim(&mut self) {
        while self.messages.len() > self.max_len {
            if let Some(entry) = self.messages.pop_front() {
                for group in self.groups.values_mut() {
                    group.pending.remove(&entry.id);
                }
            }
        }
    }

    /// Hand the next undelivered message of `group` to `consumer`
    fn deliver(&mut self, group: &str, consumer: &str) -> Option<StreamMessage> {
        let cg = self.groups.entry(group.to_string()).or_default();
        let entry = self.messages.iter().find(|e| e.id > cg.last_delivered)?;
        cg.last_delivered = entry.id;
        cg.pending
            .insert(entry.id, (consumer.to_string(), Instant::now()));
        Some(StreamMessage {
            id: entry.id.to_string(),
            payload: entry.payload.clone(),
        })
    }
}

struct SharedState {
    streams: RwLock<HashMap<String, StreamState>>,
    /// Per-stream notifiers so subscribers wake on publish instead of polling
    notifiers: RwLock<HashMap<String, Arc<Notify>>>,
    max_len: usize,
}

/// In-memory topic backend
#[derive(Clone)]
pub struct MemoryTopicBackend {
    state: Arc<SharedState>,
}

impl Default for MemoryTopicBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTopicBackend {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_STREAM_MAX_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            state: Arc::new(SharedState {
                streams: RwLock::new(HashMap::new()),
                notifiers: RwLock::new(HashMap::new()),
                max_len: max_len.max(1),
            }),
        }
    }

    fn notifier(&self, topic: &str) -> Arc<Notify> {
        if let Some(n) = self.state.notifiers.read().get(topic) {
            return Arc::clone(n);
        }
        let mut notifiers = self.state.notifiers.write();
        Arc::clone(
            notifiers
                .entry(topic.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    /// Stream IDs still waiting for an ack in `group`
    pub fn pending_ids(&self, topic: &str, group: &str) -> HashSet<String> {
        let streams = self.state.streams.read();
        streams
            .get(topic)
            .and_then(|s| s.groups.get(group))
            .map(|cg| cg.pending.keys().map(|id| id.to_string()).collect())
            .unwrap_or_default()
    }

    /// Number of messages retained for `topic`
    pub fn stream_len(&self, topic: &str) -> usize {
        self.state
            .streams
            .read()
            .get(topic)
            .map(|s| s.messages.len())
            .unwrap_or(0)
    }

    /// Payloads currently held by `topic`, oldest first
    pub fn payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state
            .streams
            .read()
            .get(topic)
            .map(|s| s.messages.iter().map(|e| e.payload.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TopicBackend for MemoryTopicBackend {
    async fn stream_publish(&self, topic: &str, payload: &[u8]) -> Result<String, TopicError> {
        let id = {
            let mut streams = self.state.streams.write();
            let stream = streams
                .entry(topic.to_string())
                .or_insert_with(|| StreamState::new(self.state.max_len));

            let id = stream.next_id;
            stream.next_id += 1;
            stream.messages.push_back(StreamEntry {
                id,
                payload: payload.to_vec(),
            });
            stream.trim();
            id
        };

        self.notifier(topic).notify_waiters();
        Ok(id.to_string())
    }

    async fn stream_subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<StreamSubscription, TopicError> {
        {
            let mut streams = self.state.streams.write();
            streams
                .entry(topic.to_string())
                .or_insert_with(|| StreamState::new(self.state.max_len))
                .groups
                .entry(group.to_string())
                .or_default();
        }

        let topic = topic.to_string();
        let group = group.to_string();
        let consumer = consumer.to_string();
        let state = Arc::clone(&self.state);
        let notifier = self.notifier(&topic);

        let stream = stream! {
            loop {
                // Register interest before checking, so a publish between the
                // check and the await is not missed
                let notified = notifier.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let next = {
                    let mut streams = state.streams.write();
                    streams
                        .get_mut(&topic)
                        .and_then(|s| s.deliver(&group, &consumer))
                };

                match next {
                    Some(msg) => yield Ok(msg),
                    None => notified.await,
                }
            }
        };

        Ok(StreamSubscription {
            receiver: Box::pin(stream),
        })
    }

    async fn stream_ack(&self, topic: &str, group: &str, id: &str) -> Result<(), TopicError> {
        let id: u64 = id
            .parse()
            .map_err(|_| TopicError::Stream(format!("invalid message id: {}", id)))?;

        let mut streams = self.state.streams.write();
        let stream = streams
            .get_mut(topic)
            .ok_or_else(|| TopicError::Stream(format!("stream not found: {}", topic)))?;

        let cg = stream.groups.get_mut(group).ok_or_else(|| {
            TopicError::ConsumerGroup(format!("consumer group not found: {}", group))
        })?;

        cg.pending.remove(&id);
        Ok(())
    }

    async fn stream_claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        let mut streams = self.state.streams.write();
        let Some(stream) = streams.get_mut(topic) else {
            return Ok(vec![]);
        };
        let Some(cg) = stream.groups.get_mut(group) else {
            return Ok(vec![]);
        };

        let now = Instant::now();
        let min_idle = Duration::from_millis(min_idle_ms);
        let mut idle_ids: Vec<u64> = cg
            .pending
            .iter()
            .filter(|(_, (_, delivered))| now.duration_since(*delivered) >= min_idle)
            .map(|(&id, _)| id)
            .collect();
        idle_ids.sort_unstable();
        idle_ids.truncate(count);

        let mut claimed = Vec::with_capacity(idle_ids.len());
        for id in idle_ids {
            if let Some(entry) = stream.messages.iter().find(|e| e.id == id) {
                cg.pending.insert(id, (consumer.to_string(), now));
                claimed.push(StreamMessage {
                    id: id.to_string(),
                    payload: entry.payload.clone(),
                });
            }
        }
        Ok(claimed)
    }

    async fn health_check(&self) -> Result<(), TopicError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
