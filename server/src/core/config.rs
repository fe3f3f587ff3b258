use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CACHE_TTL_BENEFIT, CLICKHOUSE_DEFAULT_DATABASE,
    CLICKHOUSE_DEFAULT_DIAL_TIMEOUT_SECS, CLICKHOUSE_DEFAULT_READ_TIMEOUT_SECS, CONFIG_FILE_NAME,
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_ID_NAMESPACE, DEFAULT_PRODUCE_RETRY_TIMES,
    DEFAULT_PRODUCE_TIMEOUT_MS, DEFAULT_PRODUCER_BUFFER_BYTES, DEFAULT_PRODUCER_GROUP,
    DEFAULT_STORAGE_DURATION_DAYS, DEFAULT_STREAM_MAXLEN, DEFAULT_TOS_TTL_SECS,
    DEFAULT_TRACE_TOPIC,
};
use crate::domain::idgen::MAX_SERVER_ID;
use crate::domain::platform::{PlatformType, SpanListType};
use crate::domain::query::{FieldMeta, FieldMetaConfig};
use crate::domain::span::fields;
use crate::domain::tenant::{PlatformTenantsConfig, TenantTableConfig};
use crate::domain::transform::TransCfgList;

// =============================================================================
// Backend Enums
// =============================================================================

/// Span store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Clickhouse,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Clickhouse => write!(f, "clickhouse"),
        }
    }
}

/// Cache backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// File Config Sections
// =============================================================================

/// `trace_mq_producer_cfg` section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct MqProducerFileConfig {
    /// Broker addresses; empty selects the in-process queue
    pub addr: Option<Vec<String>>,
    pub timeout_ms: Option<u64>,
    pub retry_times: Option<u32>,
    pub topic: Option<String>,
    pub producer_group: Option<String>,
    pub stream_maxlen: Option<u64>,
    pub max_buffer_bytes: Option<usize>,
}

/// `trace_ck_cfg` section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ClickhouseFileConfig {
    pub hosts: Option<Vec<String>>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub dial_timeout_s: Option<u64>,
    pub read_timeout_s: Option<u64>,
    /// Heavy columns left out of list queries
    pub super_fields: Option<HashMap<String, bool>>,
    /// LZ4 compression (default: true)
    pub compression: Option<bool>,
    /// Server-side async inserts (default: true)
    pub async_insert: Option<bool>,
}

/// `trace_attr_tos_cfg` section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TosFileConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Object key template, `{workspace_id}` and `{key}` placeholders
    pub template: Option<String>,
    /// Public URL template used instead of presigning
    pub format: Option<String>,
    pub ttl_s: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct IdGeneratorFileConfig {
    pub namespace: Option<String>,
    pub server_ids: Option<Vec<u16>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RedisFileConfig {
    pub url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CacheFileConfig {
    pub max_entries: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct BenefitFileConfig {
    pub storage_duration_days: Option<i64>,
    pub workspace_storage_days: Option<HashMap<String, i64>>,
    pub cache_ttl_s: Option<u64>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub store: Option<StoreBackend>,
    pub platform_tenants: Option<PlatformTenantsConfig>,
    pub platform_cfg: Option<HashMap<String, TransCfgList>>,
    pub trace_mq_producer_cfg: Option<MqProducerFileConfig>,
    pub trace_ck_cfg: Option<ClickhouseFileConfig>,
    pub tenant_cfg: Option<TenantTableConfig>,
    pub available_fields: Option<HashMap<String, FieldMeta>>,
    pub field_metas: Option<HashMap<String, HashMap<SpanListType, Vec<String>>>>,
    pub trace_attr_tos_cfg: Option<TosFileConfig>,
    pub id_generator: Option<IdGeneratorFileConfig>,
    pub redis: Option<RedisFileConfig>,
    pub cache: Option<CacheFileConfig>,
    pub benefit: Option<BenefitFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Replace `current` when the overlay sets a value
fn merge_opt<T>(current: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *current = other;
    }
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    ///
    /// Scalar sections merge key by key. Routing tables and rule lists are
    /// replaced whole.
    fn merge(&mut self, other: FileConfig) {
        merge_opt(&mut self.store, other.store);
        merge_opt(&mut self.platform_tenants, other.platform_tenants);
        merge_opt(&mut self.platform_cfg, other.platform_cfg);
        merge_opt(&mut self.tenant_cfg, other.tenant_cfg);
        merge_opt(&mut self.available_fields, other.available_fields);
        merge_opt(&mut self.field_metas, other.field_metas);

        if let Some(mq) = other.trace_mq_producer_cfg {
            let current = self
                .trace_mq_producer_cfg
                .get_or_insert_with(MqProducerFileConfig::default);
            merge_opt(&mut current.addr, mq.addr);
            merge_opt(&mut current.timeout_ms, mq.timeout_ms);
            merge_opt(&mut current.retry_times, mq.retry_times);
            merge_opt(&mut current.topic, mq.topic);
            merge_opt(&mut current.producer_group, mq.producer_group);
            merge_opt(&mut current.stream_maxlen, mq.stream_maxlen);
            merge_opt(&mut current.max_buffer_bytes, mq.max_buffer_bytes);
        }

        if let Some(ck) = other.trace_ck_cfg {
            let current = self
                .trace_ck_cfg
                .get_or_insert_with(ClickhouseFileConfig::default);
            merge_opt(&mut current.hosts, ck.hosts);
            merge_opt(&mut current.database, ck.database);
            merge_opt(&mut current.username, ck.username);
            merge_opt(&mut current.password, ck.password);
            merge_opt(&mut current.dial_timeout_s, ck.dial_timeout_s);
            merge_opt(&mut current.read_timeout_s, ck.read_timeout_s);
            merge_opt(&mut current.super_fields, ck.super_fields);
            merge_opt(&mut current.compression, ck.compression);
            merge_opt(&mut current.async_insert, ck.async_insert);
        }

        if let Some(tos) = other.trace_attr_tos_cfg {
            let current = self
                .trace_attr_tos_cfg
                .get_or_insert_with(TosFileConfig::default);
            merge_opt(&mut current.bucket, tos.bucket);
            merge_opt(&mut current.region, tos.region);
            merge_opt(&mut current.endpoint, tos.endpoint);
            merge_opt(&mut current.template, tos.template);
            merge_opt(&mut current.format, tos.format);
            merge_opt(&mut current.ttl_s, tos.ttl_s);
        }

        if let Some(id) = other.id_generator {
            let current = self
                .id_generator
                .get_or_insert_with(IdGeneratorFileConfig::default);
            merge_opt(&mut current.namespace, id.namespace);
            merge_opt(&mut current.server_ids, id.server_ids);
        }

        if let Some(redis) = other.redis {
            let current = self.redis.get_or_insert_with(RedisFileConfig::default);
            merge_opt(&mut current.url, redis.url);
        }

        if let Some(cache) = other.cache {
            let current = self.cache.get_or_insert_with(CacheFileConfig::default);
            merge_opt(&mut current.max_entries, cache.max_entries);
        }

        if let Some(benefit) = other.benefit {
            let current = self.benefit.get_or_insert_with(BenefitFileConfig::default);
            merge_opt(&mut current.storage_duration_days, benefit.storage_duration_days);
            merge_opt(&mut current.workspace_storage_days, benefit.workspace_storage_days);
            merge_opt(&mut current.cache_ttl_s, benefit.cache_ttl_s);
        }
    }
}

// =============================================================================
// Runtime Config
// =============================================================================

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub redis_url: Option<String>,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendType::Memory,
            redis_url: None,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MqProducerConfig {
    pub addr: Vec<String>,
    pub timeout_ms: u64,
    pub retry_times: u32,
    pub topic: String,
    pub producer_group: String,
    pub stream_maxlen: u64,
    pub max_buffer_bytes: usize,
}

impl Default for MqProducerConfig {
    fn default() -> Self {
        Self {
            addr: Vec::new(),
            timeout_ms: DEFAULT_PRODUCE_TIMEOUT_MS,
            retry_times: DEFAULT_PRODUCE_RETRY_TIMES,
            topic: DEFAULT_TRACE_TOPIC.to_string(),
            producer_group: DEFAULT_PRODUCER_GROUP.to_string(),
            stream_maxlen: DEFAULT_STREAM_MAXLEN,
            max_buffer_bytes: DEFAULT_PRODUCER_BUFFER_BYTES,
        }
    }
}

#[derive(Clone)]
pub struct ClickhouseConfig {
    pub hosts: Vec<String>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub dial_timeout_s: u64,
    pub read_timeout_s: u64,
    pub super_fields: HashMap<String, bool>,
    pub compression: bool,
    pub async_insert: bool,
}

impl fmt::Debug for ClickhouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickhouseConfig")
            .field("hosts", &self.hosts)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("dial_timeout_s", &self.dial_timeout_s)
            .field("read_timeout_s", &self.read_timeout_s)
            .field("super_fields", &self.super_fields)
            .field("compression", &self.compression)
            .field("async_insert", &self.async_insert)
            .finish()
    }
}

impl Default for ClickhouseConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            database: CLICKHOUSE_DEFAULT_DATABASE.to_string(),
            username: None,
            password: None,
            dial_timeout_s: CLICKHOUSE_DEFAULT_DIAL_TIMEOUT_SECS,
            read_timeout_s: CLICKHOUSE_DEFAULT_READ_TIMEOUT_SECS,
            super_fields: HashMap::new(),
            compression: true,
            async_insert: true,
        }
    }
}

/// Object storage holding offloaded span payloads
#[derive(Debug, Clone)]
pub struct TosConfig {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub template: String,
    pub format: Option<String>,
    pub ttl_s: u64,
}

#[derive(Debug, Clone)]
pub struct IdGeneratorConfig {
    pub namespace: String,
    pub server_ids: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct BenefitConfig {
    pub storage_duration_days: i64,
    pub workspace_storage_days: HashMap<String, i64>,
    pub cache_ttl_s: u64,
}

impl Default for BenefitConfig {
    fn default() -> Self {
        Self {
            storage_duration_days: DEFAULT_STORAGE_DURATION_DAYS,
            workspace_storage_days: HashMap::new(),
            cache_ttl_s: CACHE_TTL_BENEFIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub cache: CacheConfig,
    pub clickhouse: ClickhouseConfig,
    pub mq: MqProducerConfig,
    pub tos: Option<TosConfig>,
    pub id_generator: IdGeneratorConfig,
    pub benefit: BenefitConfig,
    pub platform_tenants: PlatformTenantsConfig,
    pub platform_cfg: HashMap<String, TransCfgList>,
    pub tenant_cfg: TenantTableConfig,
    pub field_meta: FieldMetaConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.spanloop/spanloop.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_home(path);
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::from_sources(file_config, cli);
        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, file values and CLI/env overrides
    fn from_sources(file: FileConfig, cli: &CliConfig) -> Self {
        let file_mq = file.trace_mq_producer_cfg.unwrap_or_default();
        let file_ck = file.trace_ck_cfg.unwrap_or_default();
        let file_id = file.id_generator.unwrap_or_default();
        let file_redis = file.redis.unwrap_or_default();
        let file_cache = file.cache.unwrap_or_default();
        let file_benefit = file.benefit.unwrap_or_default();

        let mq_defaults = MqProducerConfig::default();
        let mq = MqProducerConfig {
            addr: cli
                .mq_addr
                .clone()
                .map(|a| vec![a])
                .or(file_mq.addr)
                .unwrap_or_default(),
            timeout_ms: file_mq.timeout_ms.unwrap_or(mq_defaults.timeout_ms),
            retry_times: file_mq.retry_times.unwrap_or(mq_defaults.retry_times),
            topic: file_mq.topic.unwrap_or(mq_defaults.topic),
            producer_group: file_mq.producer_group.unwrap_or(mq_defaults.producer_group),
            stream_maxlen: file_mq.stream_maxlen.unwrap_or(mq_defaults.stream_maxlen),
            max_buffer_bytes: file_mq
                .max_buffer_bytes
                .unwrap_or(mq_defaults.max_buffer_bytes),
        };

        let ck_defaults = ClickhouseConfig::default();
        let mut hosts = file_ck.hosts.unwrap_or_default();
        if let Some(url) = &cli.clickhouse_url {
            hosts = vec![url.clone()];
        }
        let clickhouse = ClickhouseConfig {
            hosts,
            database: file_ck.database.unwrap_or(ck_defaults.database),
            username: file_ck.username,
            password: file_ck.password,
            dial_timeout_s: file_ck.dial_timeout_s.unwrap_or(ck_defaults.dial_timeout_s),
            read_timeout_s: file_ck.read_timeout_s.unwrap_or(ck_defaults.read_timeout_s),
            super_fields: file_ck.super_fields.unwrap_or_default(),
            compression: file_ck.compression.unwrap_or(ck_defaults.compression),
            async_insert: file_ck.async_insert.unwrap_or(ck_defaults.async_insert),
        };

        // Redis backs the counter store and cache whenever a URL is known
        let redis_url = cli.redis_url.clone().or(file_redis.url);
        let cache = CacheConfig {
            backend: if redis_url.is_some() {
                CacheBackendType::Redis
            } else {
                CacheBackendType::Memory
            },
            redis_url,
            max_entries: file_cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        };

        let tos = file.trace_attr_tos_cfg.and_then(|t| {
            let bucket = t.bucket.filter(|b| !b.is_empty())?;
            Some(TosConfig {
                bucket,
                region: t.region,
                endpoint: t.endpoint,
                template: t.template.unwrap_or_default(),
                format: t.format.filter(|f| !f.is_empty()),
                ttl_s: t.ttl_s.unwrap_or(DEFAULT_TOS_TTL_SECS),
            })
        });

        let benefit_defaults = BenefitConfig::default();
        let benefit = BenefitConfig {
            storage_duration_days: file_benefit
                .storage_duration_days
                .unwrap_or(benefit_defaults.storage_duration_days),
            workspace_storage_days: file_benefit.workspace_storage_days.unwrap_or_default(),
            cache_ttl_s: file_benefit
                .cache_ttl_s
                .unwrap_or(benefit_defaults.cache_ttl_s),
        };

        Self {
            store: cli.store.or(file.store).unwrap_or_default(),
            cache,
            clickhouse,
            mq,
            tos,
            id_generator: IdGeneratorConfig {
                namespace: file_id
                    .namespace
                    .unwrap_or_else(|| DEFAULT_ID_NAMESPACE.to_string()),
                server_ids: file_id.server_ids.unwrap_or_else(|| vec![0]),
            },
            benefit,
            platform_tenants: file.platform_tenants.unwrap_or_default(),
            platform_cfg: file.platform_cfg.unwrap_or_default(),
            tenant_cfg: file.tenant_cfg.unwrap_or_default(),
            field_meta: FieldMetaConfig {
                available_fields: file.available_fields.unwrap_or_default(),
                field_metas: file.field_metas.unwrap_or_default(),
            },
        }
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.mq.topic.is_empty() {
            anyhow::bail!("Configuration error: trace_mq_producer_cfg.topic must not be empty");
        }
        if self.mq.producer_group.is_empty() {
            anyhow::bail!(
                "Configuration error: trace_mq_producer_cfg.producer_group must not be empty"
            );
        }

        if self.store == StoreBackend::Clickhouse && self.clickhouse.hosts.is_empty() {
            anyhow::bail!(
                "Configuration error: trace_ck_cfg.hosts is required when store is 'clickhouse'"
            );
        }

        if let Some(name) = self
            .clickhouse
            .super_fields
            .keys()
            .find(|name| !fields::is_builtin(name))
        {
            anyhow::bail!(
                "Configuration error: trace_ck_cfg.super_fields has unknown field '{}'",
                name
            );
        }

        if self.id_generator.server_ids.is_empty() {
            anyhow::bail!("Configuration error: id_generator.server_ids must not be empty");
        }
        if let Some(id) = self
            .id_generator
            .server_ids
            .iter()
            .find(|id| **id > MAX_SERVER_ID)
        {
            anyhow::bail!(
                "Configuration error: id_generator.server_ids entry {} exceeds {}",
                id,
                MAX_SERVER_ID
            );
        }

        if self.benefit.storage_duration_days <= 0 {
            anyhow::bail!("Configuration error: benefit.storage_duration_days must be positive");
        }

        if let Some(tos) = &self.tos
            && tos.ttl_s == 0
        {
            anyhow::bail!("Configuration error: trace_attr_tos_cfg.ttl_s must be positive");
        }

        let known_platform = |name: &str| PlatformType::parse(name).is_some();
        if let Some(name) = self
            .platform_tenants
            .config
            .keys()
            .chain(self.platform_cfg.keys())
            .chain(self.field_meta.field_metas.keys())
            .find(|name| !known_platform(name))
        {
            anyhow::bail!("Configuration error: unknown platform '{}'", name);
        }

        let ingest_tenant = &self.platform_tenants.default_ingest_tenant;
        if ingest_tenant.is_empty() {
            anyhow::bail!(
                "Configuration error: platform_tenants.default_ingest_tenant must not be empty"
            );
        }
        if !self.tenant_cfg.insert_table.contains_key(ingest_tenant) {
            anyhow::bail!(
                "Configuration error: tenant_cfg.insert_table has no entry for ingest tenant '{}'",
                ingest_tenant
            );
        }

        Ok(())
    }
}

/// Get the profile config path (~/.spanloop/spanloop.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
