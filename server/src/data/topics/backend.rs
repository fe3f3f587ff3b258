//! Topic backend trait definition
//!
//! Trace batches travel through a stream topic with at-least-once delivery:
//! each message goes to one consumer of a group and stays pending until it
//! is acknowledged.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::error::TopicError;

/// Message received from a stream with its ID for acknowledgment
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Redis stream ID or memory sequence number
    pub id: String,
    pub payload: Vec<u8>,
}

/// Subscription to a stream topic
pub struct StreamSubscription {
    pub receiver: Pin<Box<dyn Stream<Item = Result<StreamMessage, TopicError>> + Send>>,
}

#[async_trait]
pub trait TopicBackend: Send + Sync {
    /// Append a message to the stream, returning its ID
    async fn stream_publish(&self, topic: &str, payload: &[u8]) -> Result<String, TopicError>;

    /// Subscribe to the stream as `consumer` inside `group`
    ///
    /// Messages are distributed across the consumers of a group. The group is
    /// created on first use.
    async fn stream_subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<StreamSubscription, TopicError>;

    /// Remove a message from the group's pending list
    async fn stream_ack(&self, topic: &str, group: &str, id: &str) -> Result<(), TopicError>;

    /// Take over up to `count` pending messages of `group` that have gone
    /// unacknowledged for at least `min_idle_ms`
    ///
    /// Recovers messages whose consumer failed to handle them or exited
    /// before acking. Claimed messages are pending on `consumer` afterwards.
    async fn stream_claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, TopicError>;

    async fn health_check(&self) -> Result<(), TopicError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
