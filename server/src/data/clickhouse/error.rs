//! ClickHouse error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClickhouseError {
    #[error("Database error: {0}")]
    Database(#[from] clickhouse::error::Error),

    #[error("Schema for {table} failed: {error}")]
    SchemaFailed { table: String, error: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Filter compilation failed: {0}")]
    Filter(String),

    #[error("Query timeout after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}
