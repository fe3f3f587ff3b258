//! Data storage layer
//!
//! - `clickhouse` - Column store for spans and annotations
//! - `memory` - In-process span store for single-process runs and tests
//! - `cache` - In-memory and Redis caching plus atomic counters
//! - `topics` - Message queue carrying trace batches to the persist consumer
//! - `files` - Object storage URL signing
//! - `benefit` - Workspace benefit lookups
//! - `mapper` - Domain span/annotation <-> stored row conversion
//! - `types` - Row shapes and query parameters
//! - `traits` - The `SpanStore` repository trait
//! - `error` - Unified error type for all backends

pub mod benefit;
pub mod cache;
pub mod clickhouse;
pub mod error;
pub mod files;
pub mod mapper;
pub mod memory;
pub mod topics;
pub mod traits;
pub mod types;

pub use clickhouse::ClickhouseService;
pub use error::DataError;
pub use memory::InMemorySpanStore;
pub use traits::SpanStore;
pub use types::{AnnotationQuery, AnnotationRow, SpanQuery, SpanRow};

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::{ClickhouseConfig, StoreBackend};

/// Span store service enum
///
/// Wraps the backend-specific store. Services are held as `Arc` so the
/// repository handle and background tasks can share them.
pub enum SpanStoreService {
    /// ClickHouse backend (production)
    Clickhouse(Arc<ClickhouseService>),
    /// In-process backend (development, single process)
    Memory(Arc<InMemorySpanStore>),
}

impl SpanStoreService {
    /// Connect the configured backend and create any missing tables
    pub async fn init(
        backend: StoreBackend,
        clickhouse_config: &ClickhouseConfig,
        span_tables: &[String],
        annotation_tables: &[String],
    ) -> Result<Self, DataError> {
        match backend {
            StoreBackend::Clickhouse => {
                let service = ClickhouseService::init(clickhouse_config).await?;
                service.ensure_schema(span_tables, annotation_tables).await?;
                Ok(Self::Clickhouse(Arc::new(service)))
            }
            StoreBackend::Memory => Ok(Self::Memory(Arc::new(InMemorySpanStore::new()))),
        }
    }

    /// Start the background health check task (ClickHouse only)
    pub fn start_health_check_task(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        match self {
            Self::Clickhouse(c) => Some(c.start_health_check_task(shutdown_rx)),
            Self::Memory(_) => None,
        }
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            Self::Clickhouse(_) => StoreBackend::Clickhouse,
            Self::Memory(_) => StoreBackend::Memory,
        }
    }

    /// Repository handle for domain services
    pub fn repository(&self) -> Arc<dyn SpanStore> {
        match self {
            Self::Clickhouse(c) => Arc::clone(c) as Arc<dyn SpanStore>,
            Self::Memory(m) => Arc::clone(m) as Arc<dyn SpanStore>,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_init() {
        let service = SpanStoreService::init(
            StoreBackend::Memory,
            &ClickhouseConfig::default(),
            &["spans_3d".to_string()],
            &[],
        )
        .await
        .unwrap();
        assert_eq!(service.backend(), StoreBackend::Memory);
        assert!(service.start_health_check_task(watch::channel(false).1).is_none());
        assert!(service.repository().health_check().await.is_ok());
    }
}
