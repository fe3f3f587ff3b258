//! ClickHouse span store
//!
//! Spans live in one table per (tenant, TTL class); reads fan out over
//! every table of the queried tenants with `UNION ALL`.
//!
//! - LZ4 compression for network transfer
//! - Optional async inserts for server-side batching
//! - Every read bounded by the configured read timeout

pub mod error;
pub mod filter;
pub mod schema;

pub use error::ClickhouseError;
pub use filter::{CompiledFilter, QueryParam, compile_filter};

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clickhouse::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::ClickhouseConfig;
use crate::core::constants::CLICKHOUSE_HEALTH_CHECK_INTERVAL_SECS;
use crate::data::error::DataError;
use crate::data::traits::SpanStore;
use crate::data::types::{AnnotationQuery, AnnotationRow, SpanQuery, SpanRow};

use filter::bind_params;
use schema::validate_table_name;

/// Rows returned when a query sets no limit
pub const DEFAULT_QUERY_LIMIT: u32 = 1_000;

const SPAN_COLUMNS: &[&str] = &[
    "start_time",
    "span_id",
    "parent_id",
    "trace_id",
    "duration",
    "space_id",
    "span_name",
    "span_type",
    "status_code",
    "call_type",
    "psm",
    "logid",
    "method",
    "input",
    "output",
    "object_storage",
    "tags_string",
    "tags_long",
    "tags_float",
    "tags_bool",
    "tags_byte",
    "system_tags_string",
    "system_tags_long",
    "system_tags_float",
    "logic_delete_date",
];

/// Columns that may be configured as super fields and skipped on list reads
pub const SUPER_FIELD_CANDIDATES: &[&str] = &["input", "output"];

const ANNOTATION_COLUMNS: &str = "id, span_id, trace_id, start_time, space_id, annotation_type, \
     annotation_index, key, value_type, value_string, value_long, value_float, value_bool, \
     reasoning, correction, metadata, status, created_by, created_at, updated_by, updated_at, \
     deleted_at, start_date";

pub struct ClickhouseService {
    client: Client,
    read_timeout: Duration,
    super_fields: HashSet<String>,
}

impl ClickhouseService {
    /// Connect and verify the server answers within the dial timeout
    pub async fn init(config: &ClickhouseConfig) -> Result<Self, ClickhouseError> {
        let url = config
            .hosts
            .first()
            .ok_or_else(|| ClickhouseError::Connection("no hosts configured".to_string()))?;

        let mut client = Client::default()
            .with_url(url)
            .with_database(&config.database);
        if let Some(ref user) = config.username {
            client = client.with_user(user);
        }
        if let Some(ref password) = config.password {
            client = client.with_password(password);
        }
        if config.compression {
            client = client.with_compression(clickhouse::Compression::Lz4);
        }
        if config.async_insert {
            client = client
                .with_option("async_insert", "1")
                .with_option("wait_for_async_insert", "1");
        }

        let super_fields: HashSet<String> = config
            .super_fields
            .iter()
            .filter(|(_, enabled)| **enabled)
            .filter_map(|(name, _)| {
                if SUPER_FIELD_CANDIDATES.contains(&name.as_str()) {
                    Some(name.clone())
                } else {
                    tracing::warn!(field = %name, "Ignoring unsupported super field");
                    None
                }
            })
            .collect();

        let service = Self {
            client,
            read_timeout: Duration::from_secs(config.read_timeout_s),
            super_fields,
        };

        let dial = Duration::from_secs(config.dial_timeout_s);
        match tokio::time::timeout(dial, service.ping()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ClickhouseError::Connection(format!(
                    "no answer from {} within {}s",
                    url, config.dial_timeout_s
                )));
            }
        }

        tracing::debug!(
            url = %url,
            database = %config.database,
            compression = %config.compression,
            async_insert = %config.async_insert,
            super_fields = service.super_fields.len(),
            "ClickhouseService initialized"
        );

        Ok(service)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn ping(&self) -> Result<(), ClickhouseError> {
        self.client
            .query("SELECT 1")
            .execute()
            .await
            .map_err(ClickhouseError::from)
    }

    /// Create any missing span and annotation tables
    pub async fn ensure_schema(
        &self,
        span_tables: &[String],
        annotation_tables: &[String],
    ) -> Result<(), ClickhouseError> {
        let statements = span_tables
            .iter()
            .map(|t| (t, schema::span_table(t)))
            .chain(
                annotation_tables
                    .iter()
                    .map(|t| (t, schema::annotation_table(t))),
            );
        for (table, sql) in statements {
            validate_table_name(table)?;
            self.client
                .query(&sql)
                .execute()
                .await
                .map_err(|e| ClickhouseError::SchemaFailed {
                    table: table.clone(),
                    error: e.to_string(),
                })?;
        }
        tracing::debug!(
            span_tables = span_tables.len(),
            annotation_tables = annotation_tables.len(),
            "ClickHouse schema ensured"
        );
        Ok(())
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, ClickhouseError>
    where
        F: Future<Output = Result<T, clickhouse::error::Error>>,
    {
        match tokio::time::timeout(self.read_timeout, fut).await {
            Ok(result) => result.map_err(ClickhouseError::from),
            Err(_) => Err(ClickhouseError::Timeout {
                timeout_secs: self.read_timeout.as_secs(),
            }),
        }
    }

    fn span_select_list(&self, select_all_fields: bool) -> String {
        SPAN_COLUMNS
            .iter()
            .map(|col| {
                if !select_all_fields && self.super_fields.contains(*col) {
                    format!("'' AS {col}")
                } else {
                    (*col).to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// SQL and parameters of a span read; empty when no tables are given
    fn build_span_query(
        &self,
        query: &SpanQuery,
    ) -> Result<Option<(String, Vec<QueryParam>)>, ClickhouseError> {
        if query.tables.is_empty() {
            return Ok(None);
        }
        let compiled = match &query.filters {
            Some(filters) => compile_filter(filters)?,
            None => CompiledFilter {
                sql: "1 = 1".to_string(),
                params: Vec::new(),
            },
        };
        let columns = self.span_select_list(query.select_all_fields);

        let mut branches = Vec::with_capacity(query.tables.len());
        let mut params = Vec::new();
        for table in &query.tables {
            validate_table_name(table)?;
            branches.push(format!(
                "SELECT {columns} FROM {table} \
                 WHERE start_time >= ? AND start_time <= ? AND logic_delete_date > ? AND {}",
                compiled.sql
            ));
            params.push(QueryParam::Long(query.start_time));
            params.push(QueryParam::Long(query.end_time));
            params.push(QueryParam::Long(query.now));
            params.extend(compiled.params.iter().cloned());
        }

        let order = if query.order_desc { "DESC" } else { "ASC" };
        let limit = if query.limit == 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            query.limit
        };
        params.push(QueryParam::Long(i64::from(limit)));
        let sql = format!(
            "SELECT * FROM ({}) ORDER BY start_time {order}, span_id {order} LIMIT ?",
            branches.join(" UNION ALL ")
        );
        Ok(Some((sql, params)))
    }

    fn build_annotation_query(
        &self,
        query: &AnnotationQuery,
    ) -> Result<Option<(String, Vec<QueryParam>)>, ClickhouseError> {
        if query.tables.is_empty() {
            return Ok(None);
        }
        let mut branches = Vec::with_capacity(query.tables.len());
        let mut params = Vec::new();
        for table in &query.tables {
            validate_table_name(table)?;
            let mut sql = format!(
                "SELECT {ANNOTATION_COLUMNS} FROM {table} \
                 WHERE space_id = ? AND start_time >= ? AND start_time <= ?"
            );
            params.push(QueryParam::String(query.workspace_id.clone()));
            params.push(QueryParam::Long(query.start_time));
            params.push(QueryParam::Long(query.end_time));
            if !query.span_ids.is_empty() {
                let placeholders = vec!["?"; query.span_ids.len()].join(", ");
                sql.push_str(&format!(" AND span_id IN ({placeholders})"));
                params.extend(query.span_ids.iter().cloned().map(QueryParam::String));
            }
            if !query.include_deleted {
                sql.push_str(" AND deleted_at = 0");
            }
            branches.push(sql);
        }
        let limit = if query.limit == 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            query.limit
        };
        params.push(QueryParam::Long(i64::from(limit)));
        let sql = format!(
            "SELECT * FROM ({}) ORDER BY updated_at DESC LIMIT ?",
            branches.join(" UNION ALL ")
        );
        Ok(Some((sql, params)))
    }

    /// Start health check task
    pub fn start_health_check_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(CLICKHOUSE_HEALTH_CHECK_INTERVAL_SECS));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("ClickHouse health check task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = service.ping().await {
                            tracing::warn!("ClickHouse health check failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl SpanStore for ClickhouseService {
    async fn insert_spans(&self, table: &str, rows: &[SpanRow]) -> Result<(), DataError> {
        if rows.is_empty() {
            return Ok(());
        }
        validate_table_name(table)?;
        let mut insert: clickhouse::insert::Insert<SpanRow> = self
            .client
            .insert(table)
            .await
            .map_err(ClickhouseError::from)?;
        for row in rows {
            insert.write(row).await.map_err(ClickhouseError::from)?;
        }
        insert.end().await.map_err(ClickhouseError::from)?;
        tracing::debug!(table, count = rows.len(), "Inserted spans");
        Ok(())
    }

    async fn query_spans(&self, query: &SpanQuery) -> Result<Vec<SpanRow>, DataError> {
        let Some((sql, params)) = self.build_span_query(query)? else {
            return Ok(Vec::new());
        };
        let request = bind_params(self.client.query(&sql), &params);
        let rows = self.timed(request.fetch_all::<SpanRow>()).await?;
        Ok(rows)
    }

    async fn insert_annotations(
        &self,
        table: &str,
        rows: &[AnnotationRow],
    ) -> Result<(), DataError> {
        if rows.is_empty() {
            return Ok(());
        }
        validate_table_name(table)?;
        let mut insert: clickhouse::insert::Insert<AnnotationRow> = self
            .client
            .insert(table)
            .await
            .map_err(ClickhouseError::from)?;
        for row in rows {
            insert.write(row).await.map_err(ClickhouseError::from)?;
        }
        insert.end().await.map_err(ClickhouseError::from)?;
        Ok(())
    }

    async fn list_annotations(
        &self,
        query: &AnnotationQuery,
    ) -> Result<Vec<AnnotationRow>, DataError> {
        let Some((sql, params)) = self.build_annotation_query(query)? else {
            return Ok(Vec::new());
        };
        let request = bind_params(self.client.query(&sql), &params);
        let rows = self.timed(request.fetch_all::<AnnotationRow>()).await?;
        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), DataError> {
        self.ping().await.map_err(Into::into)
    }
}
