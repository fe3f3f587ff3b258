//! In-process span store
//!
//! Keeps rows per table in memory and evaluates filters with the domain
//! matcher instead of SQL. Used for single-process runs without ClickHouse
//! and as the store behind service tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::error::DataError;
use super::mapper::row_to_span;
use super::traits::SpanStore;
use super::types::{AnnotationQuery, AnnotationRow, SpanQuery, SpanRow};

#[derive(Default)]
pub struct InMemorySpanStore {
    spans: RwLock<HashMap<String, Vec<SpanRow>>>,
    annotations: RwLock<HashMap<String, Vec<AnnotationRow>>>,
}

impl InMemorySpanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of span rows written to `table`
    pub fn span_count(&self, table: &str) -> usize {
        self.spans.read().get(table).map(Vec::len).unwrap_or(0)
    }

    fn span_visible(row: &SpanRow, query: &SpanQuery) -> bool {
        if row.start_time < query.start_time || row.start_time > query.end_time {
            return false;
        }
        if row.logic_delete_date <= query.now {
            return false;
        }
        query
            .filters
            .as_ref()
            .is_none_or(|f| f.matches(&row_to_span(row)))
    }
}

#[async_trait]
impl SpanStore for InMemorySpanStore {
    async fn insert_spans(&self, table: &str, rows: &[SpanRow]) -> Result<(), DataError> {
        self.spans
            .write()
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    async fn query_spans(&self, query: &SpanQuery) -> Result<Vec<SpanRow>, DataError> {
        let spans = self.spans.read();
        let mut rows: Vec<SpanRow> = query
            .tables
            .iter()
            .filter_map(|t| spans.get(t))
            .flatten()
            .filter(|row| Self::span_visible(row, query))
            .cloned()
            .collect();
        drop(spans);

        rows.sort_by(|a, b| {
            (a.start_time, &a.span_id).cmp(&(b.start_time, &b.span_id))
        });
        if query.order_desc {
            rows.reverse();
        }
        rows.truncate(query.limit as usize);
        Ok(rows)
    }

    async fn insert_annotations(
        &self,
        table: &str,
        rows: &[AnnotationRow],
    ) -> Result<(), DataError> {
        self.annotations
            .write()
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    async fn list_annotations(
        &self,
        query: &AnnotationQuery,
    ) -> Result<Vec<AnnotationRow>, DataError> {
        let annotations = self.annotations.read();
        let mut rows: Vec<AnnotationRow> = query
            .tables
            .iter()
            .filter_map(|t| annotations.get(t))
            .flatten()
            .filter(|row| {
                row.space_id == query.workspace_id
                    && row.start_time >= query.start_time
                    && row.start_time <= query.end_time
                    && query.span_ids.contains(&row.span_id)
                    && (query.include_deleted || row.deleted_at == 0)
            })
            .cloned()
            .collect();
        drop(annotations);

        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        rows.truncate(query.limit as usize);
        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), DataError> {
        Ok(())
    }
}
