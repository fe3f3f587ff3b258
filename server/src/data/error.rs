//! Unified error type for data layer

use thiserror::Error;

use super::cache::CacheError;
use super::files::SignerError;
use super::topics::TopicError;

/// Unified error type for data layer operations
#[derive(Error, Debug)]
pub enum DataError {
    /// ClickHouse database error
    #[error("ClickHouse error: {0}")]
    Clickhouse(#[from] clickhouse::error::Error),

    /// Cache or counter store error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Message queue error
    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    /// Object storage URL signing error
    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    /// Row could not be encoded for, or decoded from, storage
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Query timeout
    #[error("Query timeout after {timeout_secs}s on {backend}")]
    Timeout {
        backend: &'static str,
        timeout_secs: u64,
    },

    /// Upstream service (benefit, tenant lookup) failed
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl From<super::clickhouse::ClickhouseError> for DataError {
    fn from(e: super::clickhouse::ClickhouseError) -> Self {
        use super::clickhouse::ClickhouseError;
        match e {
            ClickhouseError::Database(e) => Self::Clickhouse(e),
            ClickhouseError::Timeout { timeout_secs } => Self::Timeout {
                backend: "clickhouse",
                timeout_secs,
            },
            ClickhouseError::InvalidTable(_) | ClickhouseError::Filter(_) => {
                Self::Config(e.to_string())
            }
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl DataError {
    /// Whether the failure came from a remote dependency rather than local logic
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Mapping(_) | Self::Config(_))
    }
}
