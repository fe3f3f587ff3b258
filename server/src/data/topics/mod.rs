//! Message queue for trace batches
//!
//! Stream topics with at-least-once delivery over a pluggable backend:
//! - In-memory - local-only, for development and single-process
//! - Redis Streams - distributed, producer and consumers may run apart
//!
//! An empty `trace_mq_producer_cfg.addr` selects the in-memory backend;
//! otherwise the first address is used as the Redis URL.

mod backend;
mod error;
mod memory;
mod redis;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::{StreamMessage, StreamSubscription, TopicBackend};
pub use error::TopicError;
pub use memory::MemoryTopicBackend;

use crate::core::config::MqProducerConfig;
use crate::utils::retry::{DEFAULT_BASE_DELAY_MS, retry_with_backoff_async};

/// Publish limits applied to every message of a producer
#[derive(Debug, Clone, Copy)]
pub struct PublishOptions {
    pub timeout: Duration,
    pub retry_times: u32,
}

impl From<&MqProducerConfig> for PublishOptions {
    fn from(cfg: &MqProducerConfig) -> Self {
        Self {
            timeout: Duration::from_millis(cfg.timeout_ms),
            retry_times: cfg.retry_times,
        }
    }
}

/// Central topic service owning the backend
#[derive(Clone)]
pub struct TopicService {
    backend: Arc<dyn TopicBackend>,
}

impl TopicService {
    pub async fn from_config(cfg: &MqProducerConfig) -> Result<Self, TopicError> {
        let backend: Arc<dyn TopicBackend> = match cfg.addr.first() {
            None => Arc::new(MemoryTopicBackend::with_max_len(cfg.stream_maxlen as usize)),
            Some(url) => Arc::new(redis::RedisTopicBackend::new(url, cfg.stream_maxlen).await?),
        };
        tracing::debug!(backend = backend.backend_name(), topic = %cfg.topic, "Topic service ready");
        Ok(Self { backend })
    }

    pub fn with_backend(backend: Arc<dyn TopicBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Typed handle to a stream topic; messages are JSON encoded
    pub fn stream_topic<T>(&self, name: &str) -> StreamTopic<T>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        StreamTopic {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
            _phantom: PhantomData,
        }
    }

    pub async fn health_check(&self) -> Result<(), TopicError> {
        self.backend.health_check().await
    }
}

/// Stream topic for at-least-once delivery
pub struct StreamTopic<T> {
    name: String,
    backend: Arc<dyn TopicBackend>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for StreamTopic<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            backend: Arc::clone(&self.backend),
            _phantom: PhantomData,
        }
    }
}

impl<T> StreamTopic<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encode(msg: &T) -> Result<Vec<u8>, TopicError> {
        Ok(serde_json::to_vec(msg)?)
    }

    /// Publish an already encoded payload, retrying failed or timed out sends
    ///
    /// Returns the message ID.
    pub async fn publish_payload(
        &self,
        payload: &[u8],
        opts: PublishOptions,
    ) -> Result<String, TopicError> {
        let timeout_ms = opts.timeout.as_millis() as u64;
        let result = retry_with_backoff_async(
            opts.retry_times.saturating_add(1),
            DEFAULT_BASE_DELAY_MS,
            || async {
                match tokio::time::timeout(
                    opts.timeout,
                    self.backend.stream_publish(&self.name, payload),
                )
                .await
                {
                    Ok(res) => res,
                    Err(_) => Err(TopicError::Timeout(timeout_ms)),
                }
            },
        )
        .await;

        match result {
            Ok((id, _)) => Ok(id),
            Err((e, attempts)) => {
                tracing::debug!(topic = %self.name, attempts, error = %e, "Publish failed");
                Err(e)
            }
        }
    }

    pub async fn publish(&self, msg: &T, opts: PublishOptions) -> Result<String, TopicError> {
        let payload = Self::encode(msg)?;
        self.publish_payload(&payload, opts).await
    }

    /// Claim messages of `group` left unacknowledged for at least `min_idle`
    pub async fn claim(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<Delivery<T>>, TopicError> {
        let messages = self
            .backend
            .stream_claim(
                &self.name,
                group,
                consumer,
                min_idle.as_millis() as u64,
                count,
            )
            .await?;
        Ok(messages.into_iter().map(Delivery::decode).collect())
    }

    pub async fn subscribe(
        &self,
        group: &str,
        consumer: &str,
    ) -> Result<StreamTopicSubscriber<T>, TopicError> {
        let subscription = self
            .backend
            .stream_subscribe(&self.name, group, consumer)
            .await?;
        Ok(StreamTopicSubscriber {
            acker: StreamAcker {
                name: self.name.clone(),
                group: group.to_string(),
                backend: Arc::clone(&self.backend),
            },
            subscription,
            _phantom: PhantomData,
        })
    }
}

/// Acker for acknowledging stream messages (Send + Sync)
#[derive(Clone)]
pub struct StreamAcker {
    name: String,
    group: String,
    backend: Arc<dyn TopicBackend>,
}

impl StreamAcker {
    pub async fn ack(&self, id: &str) -> Result<(), TopicError> {
        self.backend.stream_ack(&self.name, &self.group, id).await
    }
}

/// One delivered message; decoding may fail independently of delivery
pub struct Delivery<T> {
    pub id: String,
    pub message: Result<T, TopicError>,
}

impl<T: DeserializeOwned> Delivery<T> {
    fn decode(msg: StreamMessage) -> Self {
        let message = serde_json::from_slice(&msg.payload).map_err(TopicError::from);
        Self { id: msg.id, message }
    }
}

pub struct StreamTopicSubscriber<T> {
    acker: StreamAcker,
    subscription: StreamSubscription,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> StreamTopicSubscriber<T>
where
    T: DeserializeOwned,
{
    /// Receive the next message. Ack it with [`StreamAcker::ack`] once handled.
    pub async fn recv(&mut self) -> Result<Delivery<T>, TopicError> {
        match self.subscription.receiver.next().await {
            Some(result) => Ok(Delivery::decode(result?)),
            None => Err(TopicError::ChannelClosed),
        }
    }

    pub fn acker(&self) -> StreamAcker {
        self.acker.clone()
    }
}
