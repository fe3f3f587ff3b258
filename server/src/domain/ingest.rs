//! Ingest producer
//!
//! Spans leave the ingest path as JSON [`TraceData`] messages on the trace
//! topic. Messages over [`MAX_MESSAGE_BYTES`] are split one span per message;
//! a single span over the limit is rejected.
//!
//! Publishing happens on a tracked background task: the caller returns once
//! the payloads are accepted into the producer buffer, and publish failures
//! after that point are only logged. The buffer is bounded in bytes; a full
//! buffer rejects the call.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::data::topics::{PublishOptions, StreamTopic};
use crate::domain::error::{TraceError, TraceResult};
use crate::domain::span::{Span, split_tags};
use crate::domain::tenant::{TenantProvider, TtlClass};

/// Largest serialized message accepted by the queue
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantInfo {
    #[serde(default)]
    pub ttl: TtlClass,
    /// Workspace the batch was reported for, when known
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workspace_id: String,
}

/// One message on the trace topic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceData {
    pub tenant: String,
    #[serde(default)]
    pub tenant_info: TenantInfo,
    #[serde(default)]
    pub span_list: Vec<Span>,
}

impl TraceData {
    fn with_spans(&self, span_list: Vec<Span>) -> Self {
        Self {
            tenant: self.tenant.clone(),
            tenant_info: self.tenant_info.clone(),
            span_list,
        }
    }
}

pub struct TraceProducer {
    topic: StreamTopic<TraceData>,
    opts: PublishOptions,
    max_message_bytes: usize,
    /// Bytes accepted but not yet published
    buffer_bytes: Arc<AtomicUsize>,
    max_buffer_bytes: usize,
    tasks: TaskTracker,
}

impl TraceProducer {
    pub fn new(topic: StreamTopic<TraceData>, opts: PublishOptions, max_buffer_bytes: usize) -> Self {
        Self {
            topic,
            opts,
            max_message_bytes: MAX_MESSAGE_BYTES,
            buffer_bytes: Arc::new(AtomicUsize::new(0)),
            max_buffer_bytes,
            tasks: TaskTracker::new(),
        }
    }

    #[cfg(test)]
    fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    /// Queue a batch for publishing
    ///
    /// Splitting keeps span order. When a split part is rejected, the parts
    /// before it are still published and the first error is returned.
    pub async fn ingest_spans(&self, cancel: &CancellationToken, data: TraceData) -> TraceResult<()> {
        if cancel.is_cancelled() {
            return Err(TraceError::Cancelled);
        }

        let mut payloads = Vec::new();
        let result = self.encode_batch(&data, &mut payloads);
        if !payloads.is_empty() {
            self.enqueue(cancel, payloads)?;
        }
        result
    }

    fn encode_batch(&self, data: &TraceData, out: &mut Vec<Vec<u8>>) -> TraceResult<()> {
        let payload = StreamTopic::encode(data)
            .map_err(|e| TraceError::Internal(format!("marshal trace data: {e}")))?;
        if payload.len() <= self.max_message_bytes {
            out.push(payload);
            return Ok(());
        }
        if data.span_list.len() <= 1 {
            return Err(TraceError::InvalidParam("span size too large".to_string()));
        }

        tracing::debug!(
            tenant = %data.tenant,
            bytes = payload.len(),
            count = data.span_list.len(),
            "Splitting oversized trace batch"
        );
        for span in &data.span_list {
            self.encode_batch(&data.with_spans(vec![span.clone()]), out)?;
        }
        Ok(())
    }

    /// Reserve buffer space, then publish in order on a tracked task
    fn enqueue(&self, cancel: &CancellationToken, payloads: Vec<Vec<u8>>) -> TraceResult<()> {
        let size: usize = payloads.iter().map(Vec::len).sum();
        loop {
            let current = self.buffer_bytes.load(Ordering::Relaxed);
            if current + size > self.max_buffer_bytes {
                return Err(TraceError::Rpc(format!(
                    "producer buffer full ({current} of {} bytes in flight)",
                    self.max_buffer_bytes
                )));
            }
            if self
                .buffer_bytes
                .compare_exchange(current, current + size, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        let topic = self.topic.clone();
        let opts = self.opts;
        let buffer_bytes = Arc::clone(&self.buffer_bytes);
        let cancel = cancel.clone();
        self.tasks.spawn(async move {
            for payload in payloads {
                let len = payload.len();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(topic = %topic.name(), "Publish cancelled");
                    }
                    result = topic.publish_payload(&payload, opts) => match result {
                        Ok(id) => tracing::debug!(topic = %topic.name(), id = %id, bytes = len, "Trace batch published"),
                        Err(e) => tracing::error!(topic = %topic.name(), bytes = len, error = %e, "Trace batch publish failed"),
                    },
                }
                buffer_bytes.fetch_sub(len, Ordering::SeqCst);
            }
        });
        Ok(())
    }

    /// Bytes accepted but not yet published
    pub fn buffered_bytes(&self) -> usize {
        self.buffer_bytes.load(Ordering::SeqCst)
    }

    /// Wait for every queued publish to finish
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

/// A span whose custom tags arrive as one untyped `{key: value}` bag
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UntypedSpan {
    #[serde(flatten)]
    pub span: Span,
    #[serde(default)]
    pub tags: serde_json::Map<String, serde_json::Value>,
}

/// Validates spans and routes them to the ingest tenant
pub struct IngestService {
    producer: Arc<TraceProducer>,
    tenants: Arc<dyn TenantProvider>,
}

impl IngestService {
    pub fn new(producer: Arc<TraceProducer>, tenants: Arc<dyn TenantProvider>) -> Self {
        Self { producer, tenants }
    }

    /// Validate and clip every span, then queue them as one batch
    ///
    /// Any invalid span rejects the whole call.
    pub async fn ingest(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        ttl: TtlClass,
        mut spans: Vec<Span>,
    ) -> TraceResult<()> {
        if spans.is_empty() {
            return Ok(());
        }
        for span in &mut spans {
            if span.workspace_id.is_empty() {
                span.workspace_id = workspace_id.to_string();
            }
            span.validate_and_clip()?;
        }

        let data = TraceData {
            tenant: self.tenants.ingest_tenant(&spans),
            tenant_info: TenantInfo {
                ttl,
                workspace_id: workspace_id.to_string(),
            },
            span_list: spans,
        };
        self.producer.ingest_spans(cancel, data).await
    }

    /// Split each span's tag bag into the typed maps, then [`Self::ingest`]
    ///
    /// A tag that has no typed map rejects the whole call.
    pub async fn ingest_untyped(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        ttl: TtlClass,
        spans: Vec<UntypedSpan>,
    ) -> TraceResult<()> {
        let spans = spans
            .into_iter()
            .map(|untyped| {
                let mut span = untyped.span;
                span.merge_tags(split_tags(&untyped.tags)?);
                Ok(span)
            })
            .collect::<TraceResult<Vec<_>>>()?;
        self.ingest(cancel, workspace_id, ttl, spans).await
    }

    pub fn producer(&self) -> &TraceProducer {
        &self.producer
    }
}
