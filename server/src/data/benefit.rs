//! Workspace benefit lookups
//!
//! The retention check needs each workspace's trace storage duration. The
//! values come from configuration; [`CachedBenefitService`] puts any
//! implementation behind the shared cache. Cache failures are logged and
//! fall through to the inner service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::cache::{CacheKey, CacheService};
use super::error::DataError;
use crate::core::config::BenefitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceBenefit {
    pub storage_duration_days: i64,
}

#[async_trait]
pub trait BenefitService: Send + Sync {
    async fn trace_benefit(&self, workspace_id: &str) -> Result<TraceBenefit, DataError>;
}

/// Benefits from configuration: a default plus per-workspace overrides
#[derive(Debug, Clone)]
pub struct StaticBenefitService {
    default_days: i64,
    overrides: HashMap<String, i64>,
}

impl StaticBenefitService {
    pub fn new(config: &BenefitConfig) -> Self {
        Self {
            default_days: config.storage_duration_days,
            overrides: config.workspace_storage_days.clone(),
        }
    }
}

#[async_trait]
impl BenefitService for StaticBenefitService {
    async fn trace_benefit(&self, workspace_id: &str) -> Result<TraceBenefit, DataError> {
        let days = self
            .overrides
            .get(workspace_id)
            .copied()
            .unwrap_or(self.default_days);
        Ok(TraceBenefit {
            storage_duration_days: days,
        })
    }
}

pub struct CachedBenefitService {
    inner: Arc<dyn BenefitService>,
    cache: Arc<CacheService>,
    ttl: Duration,
}

impl CachedBenefitService {
    pub fn new(inner: Arc<dyn BenefitService>, cache: Arc<CacheService>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait]
impl BenefitService for CachedBenefitService {
    async fn trace_benefit(&self, workspace_id: &str) -> Result<TraceBenefit, DataError> {
        let key = CacheKey::trace_benefit(workspace_id);
        match self.cache.get::<TraceBenefit>(&key).await {
            Ok(Some(benefit)) => return Ok(benefit),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, workspace_id, "Benefit cache read failed"),
        }

        let benefit = self.inner.trace_benefit(workspace_id).await?;
        if let Err(e) = self.cache.set(&key, &benefit, Some(self.ttl)).await {
            tracing::warn!(error = %e, workspace_id, "Benefit cache write failed");
        }
        Ok(benefit)
    }
}
