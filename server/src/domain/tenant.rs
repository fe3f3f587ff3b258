//! Tenant routing
//!
//! A tenant is a logical bucket in the column store. Ingest writes to one
//! tenant, queries fan out over every tenant configured for a platform, and
//! each tenant resolves to physical tables per TTL class.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::error::{TraceError, TraceResult};
use crate::domain::span::Span;
use crate::utils::time::MICROS_PER_DAY;

/// Retention class of a span
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TtlClass {
    #[default]
    Days3,
    Days7,
    Days30,
    Days90,
    Days180,
    Days365,
}

impl TtlClass {
    pub const ALL: [TtlClass; 6] = [
        Self::Days3,
        Self::Days7,
        Self::Days30,
        Self::Days90,
        Self::Days180,
        Self::Days365,
    ];

    pub fn days(&self) -> i64 {
        match self {
            Self::Days3 => 3,
            Self::Days7 => 7,
            Self::Days30 => 30,
            Self::Days90 => 90,
            Self::Days180 => 180,
            Self::Days365 => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Days3 => "3d",
            Self::Days7 => "7d",
            Self::Days30 => "30d",
            Self::Days90 => "90d",
            Self::Days180 => "180d",
            Self::Days365 => "365d",
        }
    }

    pub fn from_days(days: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.days() == days)
    }

    /// Logical delete time for a row written at `now_us`
    pub fn delete_time_after(&self, now_us: i64) -> i64 {
        now_us.saturating_add(self.days() * MICROS_PER_DAY)
    }
}

impl fmt::Display for TtlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TtlClass {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TraceError::InvalidParam(format!("unknown ttl class: {s}")))
    }
}

impl Serialize for TtlClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TtlClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// `platform_tenants` configuration block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformTenantsConfig {
    #[serde(default)]
    pub default_ingest_tenant: String,
    /// Platform to the tenants its queries read
    #[serde(default)]
    pub config: HashMap<String, Vec<String>>,
}

/// `tenant_cfg` configuration block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantTableConfig {
    #[serde(default)]
    pub query_tables: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub insert_table: HashMap<String, HashMap<TtlClass, String>>,
    /// Tenant to the table holding its annotations
    #[serde(default)]
    pub annotation_table: HashMap<String, String>,
}

impl TenantTableConfig {
    pub fn query_tables(&self, tenant: &str) -> &[String] {
        self.query_tables
            .get(tenant)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Table receiving rows of `tenant` at `ttl`
    pub fn insert_table(&self, tenant: &str, ttl: TtlClass) -> TraceResult<&str> {
        self.insert_table
            .get(tenant)
            .and_then(|tables| tables.get(&ttl))
            .map(String::as_str)
            .ok_or_else(|| {
                TraceError::Config(format!("no insert table for tenant {tenant} ttl {ttl}"))
            })
    }

    pub fn annotation_table(&self, tenant: &str) -> TraceResult<&str> {
        self.annotation_table
            .get(tenant)
            .map(String::as_str)
            .ok_or_else(|| TraceError::Config(format!("no annotation table for tenant {tenant}")))
    }

    /// Annotation tables of a set of tenants, deduplicated
    pub fn annotation_tables_for(&self, tenants: &[String]) -> Vec<String> {
        let mut tables: Vec<String> = Vec::new();
        for table in tenants.iter().filter_map(|t| self.annotation_table.get(t)) {
            if !tables.contains(table) {
                tables.push(table.clone());
            }
        }
        tables
    }

    /// Every span table any tenant can write or read
    pub fn all_span_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .insert_table
            .values()
            .flat_map(|by_ttl| by_ttl.values())
            .chain(self.query_tables.values().flatten())
            .cloned()
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }

    pub fn all_annotation_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.annotation_table.values().cloned().collect();
        tables.sort();
        tables.dedup();
        tables
    }

    /// Every table a set of tenants reads, deduplicated in config order
    pub fn tables_for(&self, tenants: &[String]) -> Vec<String> {
        let mut tables: Vec<String> = Vec::new();
        for tenant in tenants {
            for table in self.query_tables(tenant) {
                if !tables.contains(table) {
                    tables.push(table.clone());
                }
            }
        }
        tables
    }
}

pub trait TenantProvider: Send + Sync {
    /// Tenant a batch of spans is written to
    fn ingest_tenant(&self, spans: &[Span]) -> String;

    /// Tenants a platform's queries read
    fn query_tenants(&self, platform: &str) -> TraceResult<Vec<String>>;
}

/// Static routing from the `platform_tenants` block
pub struct ConfigTenantProvider {
    config: PlatformTenantsConfig,
}

impl ConfigTenantProvider {
    pub fn new(config: PlatformTenantsConfig) -> Self {
        Self { config }
    }
}

impl TenantProvider for ConfigTenantProvider {
    fn ingest_tenant(&self, _spans: &[Span]) -> String {
        self.config.default_ingest_tenant.clone()
    }

    fn query_tenants(&self, platform: &str) -> TraceResult<Vec<String>> {
        match self.config.config.get(platform) {
            Some(tenants) if !tenants.is_empty() => Ok(tenants.clone()),
            _ => Err(TraceError::InvalidParam(
                "tenant not found for the platform".to_string(),
            )),
        }
    }
}
