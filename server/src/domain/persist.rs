//! Trace topic consumer writing spans to the column store
//!
//! Each message is one [`TraceData`] batch. Rows go to the insert table of
//! the batch's (tenant, TTL class). Messages are acknowledged after the
//! write; a message that can never be written (bad payload, no table) is
//! acknowledged and dropped, while a store failure leaves it pending.
//! Pending messages left idle for a minute are claimed back by any running
//! consumer of the group and written again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::data::SpanStore;
use crate::data::mapper::span_to_row;
use crate::data::topics::{Delivery, StreamAcker, StreamTopic, TopicError};
use crate::domain::error::{TraceError, TraceResult};
use crate::domain::ingest::TraceData;
use crate::domain::tenant::TenantTableConfig;
use crate::utils::time::now_micros;

/// How long the drain waits for one more message after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// How often the group's idle pending messages are claimed
const CLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// Pending messages idle at least this long are claimed and retried
const CLAIM_MIN_IDLE: Duration = Duration::from_secs(60);

/// Messages claimed per round
const CLAIM_BATCH: usize = 100;

pub struct SpanPersistConsumer {
    store: Arc<dyn SpanStore>,
    tables: Arc<TenantTableConfig>,
    group: String,
    claim_interval: Duration,
    claim_min_idle: Duration,
}

impl SpanPersistConsumer {
    pub fn new(store: Arc<dyn SpanStore>, tables: Arc<TenantTableConfig>, group: &str) -> Self {
        Self {
            store,
            tables,
            group: group.to_string(),
            claim_interval: CLAIM_INTERVAL,
            claim_min_idle: CLAIM_MIN_IDLE,
        }
    }

    #[cfg(test)]
    fn with_claim_timing(mut self, interval: Duration, min_idle: Duration) -> Self {
        self.claim_interval = interval;
        self.claim_min_idle = min_idle;
        self
    }

    /// Write one batch, returning the number of rows inserted
    pub async fn persist(&self, data: &TraceData) -> TraceResult<usize> {
        if data.span_list.is_empty() {
            return Ok(0);
        }
        let ttl = data.tenant_info.ttl;
        let table = self.tables.insert_table(&data.tenant, ttl)?;

        let now = now_micros();
        let rows: Vec<_> = data
            .span_list
            .iter()
            .map(|span| span_to_row(span, Some(ttl), now))
            .collect();
        self.store.insert_spans(table, &rows).await?;

        tracing::debug!(tenant = %data.tenant, table, ttl = %ttl, count = rows.len(), "Spans persisted");
        Ok(rows.len())
    }

    pub fn start(
        self,
        topic: StreamTopic<TraceData>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let consumer = format!("{}:{}", Uuid::new_v4(), std::process::id());

        tokio::spawn(async move {
            let mut subscriber = match topic.subscribe(&self.group, &consumer).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, topic = %topic.name(), "Failed to subscribe to trace topic");
                    return;
                }
            };
            let acker = subscriber.acker();

            tracing::debug!(
                consumer = %consumer,
                group = %self.group,
                topic = %topic.name(),
                "SpanPersistConsumer started"
            );

            let mut claim_tick = tokio::time::interval(self.claim_interval);
            claim_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut shutdown_requested = false;
            loop {
                if shutdown_requested {
                    match tokio::time::timeout(DRAIN_TIMEOUT, subscriber.recv()).await {
                        Ok(Ok(delivery)) => {
                            self.handle(&acker, delivery).await;
                            continue;
                        }
                        _ => break,
                    }
                }

                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("SpanPersistConsumer received shutdown, draining...");
                            shutdown_requested = true;
                        }
                    }
                    _ = claim_tick.tick() => {
                        self.retry_pending(&topic, &consumer, &acker).await;
                    }
                    result = subscriber.recv() => {
                        match result {
                            Ok(delivery) => self.handle(&acker, delivery).await,
                            Err(TopicError::ChannelClosed) => break,
                            Err(e) => {
                                tracing::error!(error = %e, "SpanPersistConsumer receive error");
                                break;
                            }
                        }
                    }
                }
            }

            tracing::debug!("SpanPersistConsumer shutdown complete");
        })
    }

    /// Claim the group's idle pending messages and handle them again
    async fn retry_pending(
        &self,
        topic: &StreamTopic<TraceData>,
        consumer: &str,
        acker: &StreamAcker,
    ) {
        let deliveries = match topic
            .claim(&self.group, consumer, self.claim_min_idle, CLAIM_BATCH)
            .await
        {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, group = %self.group, "Failed to claim pending trace messages");
                return;
            }
        };
        if deliveries.is_empty() {
            return;
        }

        tracing::debug!(count = deliveries.len(), group = %self.group, "Retrying pending trace messages");
        for delivery in deliveries {
            self.handle(acker, delivery).await;
        }
    }

    async fn handle(&self, acker: &StreamAcker, delivery: Delivery<TraceData>) {
        let ack = match &delivery.message {
            Err(e) => {
                tracing::warn!(msg_id = %delivery.id, error = %e, "Dropping undecodable trace message");
                true
            }
            Ok(data) => match self.persist(data).await {
                Ok(_) => true,
                Err(e @ TraceError::Rpc(_)) => {
                    tracing::error!(
                        msg_id = %delivery.id,
                        tenant = %data.tenant,
                        error = %e,
                        "Span insert failed, leaving message pending"
                    );
                    false
                }
                Err(e) => {
                    tracing::error!(
                        msg_id = %delivery.id,
                        tenant = %data.tenant,
                        error = %e,
                        "Dropping trace message that cannot be persisted"
                    );
                    true
                }
            },
        };

        if ack && let Err(e) = acker.ack(&delivery.id).await {
            tracing::warn!(error = %e, msg_id = %delivery.id, "Failed to ack message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::data::InMemorySpanStore;
    use crate::data::error::DataError;
    use crate::data::types::{AnnotationQuery, AnnotationRow, SpanRow};
    use crate::data::topics::{MemoryTopicBackend, PublishOptions, TopicService};
    use crate::data::types::SpanQuery;
    use crate::domain::ingest::TenantInfo;
    use crate::domain::span::Span;
    use crate::domain::tenant::TtlClass;

    const TOPIC: &str = "trace_ingest";
    const GROUP: &str = "persist";

    fn tables() -> Arc<TenantTableConfig> {
        Arc::new(
            serde_json::from_value(serde_json::json!({
                "insert_table": {"spans": {"3d": "spans_3d", "7d": "spans_7d"}}
            }))
            .unwrap(),
        )
    }

    fn batch(tenant: &str, ttl: TtlClass, ids: &[&str]) -> TraceData {
        TraceData {
            tenant: tenant.into(),
            tenant_info: TenantInfo {
                ttl,
                ..Default::default()
            },
            span_list: ids
                .iter()
                .map(|id| Span {
                    span_id: id.to_string(),
                    trace_id: "t1".into(),
                    workspace_id: "ws1".into(),
                    start_time: now_micros(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_persist_routes_by_ttl() {
        let store = Arc::new(InMemorySpanStore::new());
        let consumer = SpanPersistConsumer::new(store.clone(), tables(), GROUP);

        assert_eq!(
            consumer
                .persist(&batch("spans", TtlClass::Days7, &["a", "b"]))
                .await
                .unwrap(),
            2
        );
        assert_eq!(store.span_count("spans_7d"), 2);
        assert_eq!(store.span_count("spans_3d"), 0);

        let rows = store
            .query_spans(&SpanQuery {
                tables: vec!["spans_7d".into()],
                start_time: 0,
                end_time: i64::MAX,
                limit: 10,
                now: now_micros(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(
            rows.iter()
                .all(|r| r.logic_delete_date > now_micros() + 6 * crate::utils::time::MICROS_PER_DAY)
        );
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_config_error() {
        let consumer = SpanPersistConsumer::new(Arc::new(InMemorySpanStore::new()), tables(), GROUP);
        let err = consumer
            .persist(&batch("other", TtlClass::Days3, &["a"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "config.invalid");
    }

    #[tokio::test]
    async fn test_consumer_persists_and_acks() {
        let backend = Arc::new(MemoryTopicBackend::new());
        let topic: StreamTopic<TraceData> = TopicService::with_backend(backend.clone()).stream_topic(TOPIC);
        let opts = PublishOptions {
            timeout: Duration::from_secs(1),
            retry_times: 0,
        };
        topic
            .publish(&batch("spans", TtlClass::Days3, &["a", "b"]), opts)
            .await
            .unwrap();
        topic.publish_payload(b"not json", opts).await.unwrap();
        topic
            .publish(&batch("nobody", TtlClass::Days3, &["c"]), opts)
            .await
            .unwrap();

        let store = Arc::new(InMemorySpanStore::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = SpanPersistConsumer::new(store.clone(), tables(), GROUP)
            .start(topic.clone(), shutdown_rx);

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.span_count("spans_3d") < 2 || !backend.pending_ids(TOPIC, GROUP).is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.span_count("spans_3d"), 2);
        assert!(backend.pending_ids(TOPIC, GROUP).is_empty());
    }

    /// Fails the first `failures` span inserts, then writes through
    struct FlakyStore {
        inner: InMemorySpanStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl SpanStore for FlakyStore {
        async fn insert_spans(&self, table: &str, rows: &[SpanRow]) -> Result<(), DataError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DataError::Upstream("connection reset".into()));
            }
            self.inner.insert_spans(table, rows).await
        }

        async fn query_spans(&self, query: &SpanQuery) -> Result<Vec<SpanRow>, DataError> {
            self.inner.query_spans(query).await
        }

        async fn insert_annotations(
            &self,
            table: &str,
            rows: &[AnnotationRow],
        ) -> Result<(), DataError> {
            self.inner.insert_annotations(table, rows).await
        }

        async fn list_annotations(
            &self,
            query: &AnnotationQuery,
        ) -> Result<Vec<AnnotationRow>, DataError> {
            self.inner.list_annotations(query).await
        }

        async fn health_check(&self) -> Result<(), DataError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_insert_is_retried_by_next_consumer() {
        let backend = Arc::new(MemoryTopicBackend::new());
        let topic: StreamTopic<TraceData> = TopicService::with_backend(backend.clone()).stream_topic(TOPIC);
        let opts = PublishOptions {
            timeout: Duration::from_secs(1),
            retry_times: 0,
        };
        topic
            .publish(&batch("spans", TtlClass::Days3, &["a"]), opts)
            .await
            .unwrap();

        // First consumer hits a store outage and leaves the message pending
        let down = Arc::new(FlakyStore {
            inner: InMemorySpanStore::new(),
            failures: AtomicUsize::new(usize::MAX),
        });
        let (tx, rx) = watch::channel(false);
        let handle = SpanPersistConsumer::new(down.clone(), tables(), GROUP)
            .with_claim_timing(Duration::from_secs(3600), Duration::from_secs(3600))
            .start(topic.clone(), rx);
        tokio::time::timeout(Duration::from_secs(2), async {
            while backend.pending_ids(TOPIC, GROUP).is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(down.inner.span_count("spans_3d"), 0);
        assert_eq!(backend.pending_ids(TOPIC, GROUP).len(), 1);

        // A restarted consumer claims it once the store is back
        let store = Arc::new(InMemorySpanStore::new());
        let (tx, rx) = watch::channel(false);
        let handle = SpanPersistConsumer::new(store.clone(), tables(), GROUP)
            .with_claim_timing(Duration::from_millis(20), Duration::ZERO)
            .start(topic.clone(), rx);
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.span_count("spans_3d") < 1 || !backend.pending_ids(TOPIC, GROUP).is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(store.span_count("spans_3d"), 1);
    }

    #[tokio::test]
    async fn test_consumer_retries_its_own_failed_insert() {
        let backend = Arc::new(MemoryTopicBackend::new());
        let topic: StreamTopic<TraceData> = TopicService::with_backend(backend.clone()).stream_topic(TOPIC);
        let opts = PublishOptions {
            timeout: Duration::from_secs(1),
            retry_times: 0,
        };
        topic
            .publish(&batch("spans", TtlClass::Days3, &["a", "b"]), opts)
            .await
            .unwrap();

        let store = Arc::new(FlakyStore {
            inner: InMemorySpanStore::new(),
            failures: AtomicUsize::new(1),
        });
        let (tx, rx) = watch::channel(false);
        let handle = SpanPersistConsumer::new(store.clone(), tables(), GROUP)
            .with_claim_timing(Duration::from_millis(20), Duration::from_millis(10))
            .start(topic.clone(), rx);
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.inner.span_count("spans_3d") < 2 || !backend.pending_ids(TOPIC, GROUP).is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(store.inner.span_count("spans_3d"), 2);
    }
}
