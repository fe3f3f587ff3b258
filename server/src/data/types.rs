//! Persisted row shapes and store query parameters

use clickhouse::Row;
use serde::{Deserialize, Serialize};

use crate::domain::filter::FilterFields;

/// Span row as stored in the column store
///
/// Map columns are carried as key/value pairs, nullable columns as
/// `Option`, and bool tags as `0`/`1`.
#[derive(Debug, Clone, Default, PartialEq, Row, Serialize, Deserialize)]
pub struct SpanRow {
    pub start_time: i64,
    pub span_id: String,
    pub parent_id: String,
    pub trace_id: String,
    pub duration: i64,
    pub space_id: String,
    pub span_name: String,
    pub span_type: String,
    pub status_code: i32,
    pub call_type: Option<String>,
    pub psm: Option<String>,
    pub logid: Option<String>,
    pub method: Option<String>,
    pub input: String,
    pub output: String,
    pub object_storage: Option<String>,
    pub tags_string: Vec<(String, String)>,
    pub tags_long: Vec<(String, i64)>,
    pub tags_float: Vec<(String, f64)>,
    pub tags_bool: Vec<(String, u8)>,
    pub tags_byte: Vec<(String, String)>,
    pub system_tags_string: Vec<(String, String)>,
    pub system_tags_long: Vec<(String, i64)>,
    pub system_tags_float: Vec<(String, f64)>,
    /// Microseconds after which the row is no longer readable
    pub logic_delete_date: i64,
}

/// Annotation row; exactly one `value_*` column is meaningful per `value_type`
#[derive(Debug, Clone, Default, PartialEq, Row, Serialize, Deserialize)]
pub struct AnnotationRow {
    pub id: String,
    pub span_id: String,
    pub trace_id: String,
    pub start_time: i64,
    pub space_id: String,
    pub annotation_type: String,
    pub annotation_index: Vec<String>,
    pub key: String,
    pub value_type: String,
    pub value_string: String,
    pub value_long: i64,
    pub value_float: f64,
    pub value_bool: u8,
    pub reasoning: String,
    /// JSON array of corrections
    pub correction: String,
    /// JSON object whose shape depends on `annotation_type`
    pub metadata: String,
    pub status: String,
    pub created_by: String,
    pub created_at: i64,
    pub updated_by: String,
    pub updated_at: i64,
    pub deleted_at: i64,
    /// `YYYY-MM-DD` of `start_time`, the partition key
    pub start_date: String,
}

/// Span read parameters
#[derive(Debug, Clone, Default)]
pub struct SpanQuery {
    pub tables: Vec<String>,
    /// Inclusive lower bound on `start_time` (microseconds)
    pub start_time: i64,
    /// Inclusive upper bound on `start_time` (microseconds)
    pub end_time: i64,
    pub filters: Option<FilterFields>,
    pub limit: u32,
    pub order_desc: bool,
    /// Rows whose `logic_delete_date` is at or before this are hidden
    pub now: i64,
    /// Also read columns configured as super fields
    pub select_all_fields: bool,
}

/// Annotation read parameters
#[derive(Debug, Clone, Default)]
pub struct AnnotationQuery {
    pub tables: Vec<String>,
    pub workspace_id: String,
    pub span_ids: Vec<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub include_deleted: bool,
    pub limit: u32,
}
