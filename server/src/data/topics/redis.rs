//! Redis topic backend using Streams
//!
//! - `XADD` with approximate `MAXLEN` trimming for publishing
//! - `XREADGROUP` for consuming through consumer groups
//! - `XACK` for acknowledgment
//! - `XPENDING` + `XCLAIM` to take over idle pending messages
//!
//! Stream keys are `{spanloop}:stream:{topic}`; the hash tag keeps every
//! stream on one Redis Cluster slot.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use deadpool_redis::redis::{RedisResult, Value as RedisValue};
use deadpool_redis::{Config, Pool, Runtime};

use super::backend::{StreamMessage, StreamSubscription, TopicBackend};
use super::error::TopicError;
use crate::data::cache::sanitize_redis_url;

/// Stream key prefix (hash tag for Redis Cluster)
const STREAM_PREFIX: &str = "{spanloop}:stream:";

/// XREADGROUP block timeout in milliseconds
const XREADGROUP_BLOCK_MS: u64 = 5000;

/// Messages fetched per XREADGROUP call
const XREADGROUP_COUNT: usize = 256;

pub struct RedisTopicBackend {
    pool: Pool,
    stream_maxlen: u64,
}

impl RedisTopicBackend {
    pub async fn new(redis_url: &str, stream_maxlen: u64) -> Result<Self, TopicError> {
        let sanitized_url = sanitize_redis_url(redis_url);

        let mut config = Config::from_url(redis_url);
        config.pool = Some(deadpool_redis::PoolConfig {
            max_size: 16,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(Duration::from_secs(5)),
                create: Some(Duration::from_secs(5)),
                recycle: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        });

        let pool = config.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            TopicError::Connection(format!(
                "Failed to create Redis pool for {sanitized_url}: {e}"
            ))
        })?;

        let mut conn = pool.get().await.map_err(|e| {
            TopicError::Connection(format!(
                "Failed to get Redis connection from pool for {sanitized_url}: {e}"
            ))
        })?;

        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| {
                TopicError::Connection(format!("Redis PING failed for {sanitized_url}: {e}"))
            })?;

        tracing::debug!(url = %sanitized_url, "Redis topic backend connected");

        Ok(Self {
            pool,
            stream_maxlen: stream_maxlen.max(1),
        })
    }

    /// Create the consumer group, starting from the first entry
    async fn ensure_consumer_group(&self, key: &str, group: &str) -> Result<(), TopicError> {
        let mut conn = self.pool.get().await?;
        match create_group(&mut conn, key, group).await {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(TopicError::ConsumerGroup(format!(
                "Failed to create consumer group {group}: {e}"
            ))),
        }
    }
}

fn stream_key(topic: &str) -> String {
    format!("{}{}", STREAM_PREFIX, topic)
}

async fn create_group(
    conn: &mut deadpool_redis::Connection,
    key: &str,
    group: &str,
) -> RedisResult<()> {
    deadpool_redis::redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(key)
        .arg(group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async::<String>(conn)
        .await
        .map(|_| ())
}

#[async_trait]
impl TopicBackend for RedisTopicBackend {
    async fn stream_publish(&self, topic: &str, payload: &[u8]) -> Result<String, TopicError> {
        let key = stream_key(topic);
        let mut conn = self.pool.get().await?;

        let id: String = deadpool_redis::redis::cmd("XADD")
            .arg(&key)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.stream_maxlen)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        Ok(id)
    }

    async fn stream_subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<StreamSubscription, TopicError> {
        let key = stream_key(topic);
        self.ensure_consumer_group(&key, group).await?;

        let group = group.to_string();
        let consumer = consumer.to_string();
        let pool = self.pool.clone();

        let stream = stream! {
            loop {
                let mut conn = match pool.get().await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to get Redis connection, retrying...");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                let result: RedisResult<RedisValue> = deadpool_redis::redis::cmd("XREADGROUP")
                    .arg("GROUP")
                    .arg(&group)
                    .arg(&consumer)
                    .arg("BLOCK")
                    .arg(XREADGROUP_BLOCK_MS)
                    .arg("COUNT")
                    .arg(XREADGROUP_COUNT)
                    .arg("STREAMS")
                    .arg(&key)
                    .arg(">")
                    .query_async(&mut conn)
                    .await;

                match result {
                    Ok(RedisValue::Nil) => continue,
                    Ok(value) => {
                        for msg in parse_xreadgroup_response(value) {
                            yield Ok(msg);
                        }
                    }
                    Err(e) if e.to_string().contains("NOGROUP") => {
                        // Stream key was deleted and recreated
                        tracing::warn!(group = %group, "Consumer group lost, recreating");
                        if let Err(e) = create_group(&mut conn, &key, &group).await {
                            tracing::debug!(error = %e, "Recreating consumer group failed");
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "XREADGROUP error, retrying...");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        };

        Ok(StreamSubscription {
            receiver: Box::pin(stream),
        })
    }

    async fn stream_ack(&self, topic: &str, group: &str, id: &str) -> Result<(), TopicError> {
        let key = stream_key(topic);
        let mut conn = self.pool.get().await?;

        let _: i64 = deadpool_redis::redis::cmd("XACK")
            .arg(&key)
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await?;

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
        let key = stream_key(topic);
        let mut conn = self.pool.get().await?;

        let pending: RedisValue = deadpool_redis::redis::cmd("XPENDING")
            .arg(&key)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let ids = parse_idle_pending(pending, min_idle_ms);
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let mut cmd = deadpool_redis::redis::cmd("XCLAIM");
        cmd.arg(&key).arg(group).arg(consumer).arg(min_idle_ms);
        for id in &ids {
            cmd.arg(id);
        }
        let claimed: RedisValue = cmd.query_async(&mut conn).await?;

        let RedisValue::Array(entries) = claimed else {
            return Ok(vec![]);
        };
        Ok(parse_entries(&entries))
    }

    async fn health_check(&self) -> Result<(), TopicError> {
        let mut conn = self.pool.get().await?;
        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| TopicError::Connection(e.to_string()))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Parse an XREADGROUP reply: `[[stream, [[id, [field, value, ...]], ...]], ...]`
fn parse_xreadgroup_response(value: RedisValue) -> Vec<StreamMessage> {
    let RedisValue::Array(streams) = value else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    for stream_data in streams {
        let RedisValue::Array(parts) = stream_data else {
            continue;
        };
        if let Some(RedisValue::Array(msg_list)) = parts.get(1) {
            messages.extend(parse_entries(msg_list));
        }
    }
    messages
}

/// Parse stream entries `[[id, [field, value, ...]], ...]`
///
/// Entries without a payload field (or trimmed away, for XCLAIM) are skipped.
fn parse_entries(entries: &[RedisValue]) -> Vec<StreamMessage> {
    entries
        .iter()
        .filter_map(|msg| {
            if let RedisValue::Array(msg_parts) = msg
                && msg_parts.len() >= 2
                && let (RedisValue::BulkString(id_bytes), RedisValue::Array(fields)) =
                    (&msg_parts[0], &msg_parts[1])
                && let Ok(id) = String::from_utf8(id_bytes.clone())
                && let Some(payload) = extract_payload_from_fields(fields)
            {
                Some(StreamMessage { id, payload })
            } else {
                None
            }
        })
        .collect()
}

/// IDs from an extended XPENDING reply `[[id, consumer, idle_ms, deliveries], ...]`
/// that have been idle for at least `min_idle_ms`
fn parse_idle_pending(value: RedisValue, min_idle_ms: u64) -> Vec<String> {
    let RedisValue::Array(entries) = value else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            if let RedisValue::Array(parts) = entry
                && parts.len() >= 3
                && let (RedisValue::BulkString(id_bytes), RedisValue::Int(idle)) =
                    (&parts[0], &parts[2])
                && *idle as u64 >= min_idle_ms
            {
                String::from_utf8(id_bytes.clone()).ok()
            } else {
                None
            }
        })
        .collect()
}

/// Find the `payload` value among `[field1, value1, field2, value2, ...]`
fn extract_payload_from_fields(fields: &[RedisValue]) -> Option<Vec<u8>> {
    fields.chunks(2).find_map(|pair| match pair {
        [RedisValue::BulkString(name), RedisValue::BulkString(payload)] if name == b"payload" => {
            Some(payload.clone())
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &[u8]) -> RedisValue {
        RedisValue::BulkString(s.to_vec())
    }

    #[test]
    fn test_stream_key() {
        assert_eq!(stream_key("trace_ingest"), "{spanloop}:stream:trace_ingest");
    }

    #[test]
    fn test_extract_payload_skips_other_fields() {
        let fields = vec![bulk(b"tenant"), bulk(b"t1"), bulk(b"payload"), bulk(b"{}")];
        assert_eq!(extract_payload_from_fields(&fields), Some(b"{}".to_vec()));
        assert_eq!(extract_payload_from_fields(&[bulk(b"other"), bulk(b"x")]), None);
        assert_eq!(extract_payload_from_fields(&[bulk(b"payload")]), None);
    }

    #[test]
    fn test_parse_xreadgroup_response() {
        let reply = RedisValue::Array(vec![RedisValue::Array(vec![
            bulk(b"{spanloop}:stream:t"),
            RedisValue::Array(vec![
                RedisValue::Array(vec![
                    bulk(b"1-0"),
                    RedisValue::Array(vec![bulk(b"payload"), bulk(b"a")]),
                ]),
                RedisValue::Array(vec![
                    bulk(b"2-0"),
                    RedisValue::Array(vec![bulk(b"payload"), bulk(b"b")]),
                ]),
                // Entry without a payload field is skipped
                RedisValue::Array(vec![bulk(b"3-0"), RedisValue::Array(vec![])]),
            ]),
        ])]);

        let messages = parse_xreadgroup_response(reply);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "1-0");
        assert_eq!(messages[1].payload, b"b");
        assert!(parse_xreadgroup_response(RedisValue::Nil).is_empty());
    }

    #[test]
    fn test_parse_idle_pending() {
        let reply = RedisValue::Array(vec![
            RedisValue::Array(vec![
                bulk(b"1-0"),
                bulk(b"c1"),
                RedisValue::Int(90_000),
                RedisValue::Int(1),
            ]),
            RedisValue::Array(vec![
                bulk(b"2-0"),
                bulk(b"c1"),
                RedisValue::Int(10),
                RedisValue::Int(1),
            ]),
            RedisValue::Array(vec![bulk(b"3-0")]),
        ]);
        assert_eq!(parse_idle_pending(reply, 60_000), vec!["1-0".to_string()]);
        assert!(parse_idle_pending(RedisValue::Nil, 0).is_empty());
    }

    #[test]
    fn test_parse_claimed_entries_skips_trimmed() {
        let entries = vec![
            RedisValue::Array(vec![
                bulk(b"1-0"),
                RedisValue::Array(vec![bulk(b"payload"), bulk(b"a")]),
            ]),
            RedisValue::Nil,
        ];
        let messages = parse_entries(&entries);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "1-0");
    }
}
