//! ClickHouse schema definitions
//!
//! One span table per (tenant, TTL class) and one annotation table per
//! tenant. Tables are created on startup with `CREATE TABLE IF NOT EXISTS`;
//! there is no versioned migration.
//!
//! - `ReplacingMergeTree` deduplicates re-delivered rows on merge
//! - Daily partitions by start time
//! - Bloom filter indices for trace and span id lookups
//! - Row TTL on `logic_delete_date`

use super::ClickhouseError;

/// Table names are interpolated into SQL, so only plain identifiers pass
pub fn validate_table_name(table: &str) -> Result<(), ClickhouseError> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid_start && valid_rest && table.len() <= 128 {
        Ok(())
    } else {
        Err(ClickhouseError::InvalidTable(table.to_string()))
    }
}

pub fn span_table(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    start_time              Int64,
    span_id                 String,
    parent_id               String,
    trace_id                String,
    duration                Int64,
    space_id                String,
    span_name               String,
    span_type               LowCardinality(String),
    status_code             Int32,
    call_type               LowCardinality(Nullable(String)),
    psm                     Nullable(String),
    logid                   Nullable(String),
    method                  Nullable(String),
    input                   String CODEC(ZSTD(3)),
    output                  String CODEC(ZSTD(3)),
    object_storage          Nullable(String),
    tags_string             Map(String, String),
    tags_long               Map(String, Int64),
    tags_float              Map(String, Float64),
    tags_bool               Map(String, UInt8),
    tags_byte               Map(String, String),
    system_tags_string      Map(String, String),
    system_tags_long        Map(String, Int64),
    system_tags_float       Map(String, Float64),
    logic_delete_date       Int64,

    INDEX idx_trace_id trace_id TYPE bloom_filter(0.001) GRANULARITY 1,
    INDEX idx_span_id span_id TYPE bloom_filter(0.001) GRANULARITY 1
) ENGINE = ReplacingMergeTree()
PARTITION BY toDate(toDateTime(intDiv(start_time, 1000000)))
ORDER BY (space_id, start_time, span_id)
TTL toDateTime(intDiv(logic_delete_date, 1000000)) DELETE
SETTINGS index_granularity = 8192
"#
    )
}

pub fn annotation_table(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id                      String,
    span_id                 String,
    trace_id                String,
    start_time              Int64,
    space_id                String,
    annotation_type         LowCardinality(String),
    annotation_index        Array(String),
    key                     String,
    value_type              LowCardinality(String),
    value_string            String,
    value_long              Int64,
    value_float             Float64,
    value_bool              UInt8,
    reasoning               String,
    correction              String,
    metadata                String,
    status                  LowCardinality(String),
    created_by              String,
    created_at              Int64,
    updated_by              String,
    updated_at              Int64,
    deleted_at              Int64,
    start_date              String,

    INDEX idx_span_id span_id TYPE bloom_filter(0.001) GRANULARITY 1
) ENGINE = ReplacingMergeTree(updated_at)
PARTITION BY start_date
ORDER BY (space_id, span_id, id)
SETTINGS index_granularity = 8192
"#
    )
}
