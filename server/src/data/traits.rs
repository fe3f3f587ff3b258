//! Repository traits for the column store
//!
//! The ClickHouse service and the in-memory store both implement
//! [`SpanStore`]; the domain layer only sees the trait.

use async_trait::async_trait;

use crate::data::error::DataError;
use crate::data::types::{AnnotationQuery, AnnotationRow, SpanQuery, SpanRow};

#[async_trait]
pub trait SpanStore: Send + Sync {
    // ==================== Span Operations ====================

    /// Append span rows to one physical table
    async fn insert_spans(&self, table: &str, rows: &[SpanRow]) -> Result<(), DataError>;

    /// Read spans across every table of the query, ordered by `start_time`
    async fn query_spans(&self, query: &SpanQuery) -> Result<Vec<SpanRow>, DataError>;

    // ==================== Annotation Operations ====================

    async fn insert_annotations(&self, table: &str, rows: &[AnnotationRow])
    -> Result<(), DataError>;

    async fn list_annotations(
        &self,
        query: &AnnotationQuery,
    ) -> Result<Vec<AnnotationRow>, DataError>;

    // ==================== Health ====================

    async fn health_check(&self) -> Result<(), DataError>;
}
