// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "Spanloop";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "spanloop";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".spanloop";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "spanloop.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "SPANLOOP_CONFIG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "SPANLOOP_LOG";

// =============================================================================
// Environment Variables - Backends
// =============================================================================

/// Environment variable for the span store backend (memory or clickhouse)
pub const ENV_STORE_BACKEND: &str = "SPANLOOP_STORE_BACKEND";

/// Environment variable for the Redis URL (counter store and cache)
pub const ENV_REDIS_URL: &str = "SPANLOOP_REDIS_URL";

/// Environment variable for the first ClickHouse host
pub const ENV_CLICKHOUSE_URL: &str = "SPANLOOP_CLICKHOUSE_URL";

/// Environment variable for the message queue address
pub const ENV_MQ_ADDR: &str = "SPANLOOP_MQ_ADDR";

// =============================================================================
// Message Queue
// =============================================================================

/// Default trace topic
pub const DEFAULT_TRACE_TOPIC: &str = "trace_ingest";

/// Default consumer group of the persist consumer
pub const DEFAULT_PRODUCER_GROUP: &str = "spanloop_persist";

/// Default publish timeout per attempt (ms)
pub const DEFAULT_PRODUCE_TIMEOUT_MS: u64 = 3000;

/// Default publish retries after the first attempt
pub const DEFAULT_PRODUCE_RETRY_TIMES: u32 = 2;

/// Default approximate stream length kept by the broker
pub const DEFAULT_STREAM_MAXLEN: u64 = 1_000_000;

/// Default bytes the producer may hold unpublished (256 MB)
pub const DEFAULT_PRODUCER_BUFFER_BYTES: usize = 256 * 1024 * 1024;

// =============================================================================
// ClickHouse
// =============================================================================

pub const CLICKHOUSE_DEFAULT_DATABASE: &str = "spanloop";

pub const CLICKHOUSE_DEFAULT_DIAL_TIMEOUT_SECS: u64 = 5;

pub const CLICKHOUSE_DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Health check interval in seconds
pub const CLICKHOUSE_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

// =============================================================================
// ID Generator
// =============================================================================

pub const DEFAULT_ID_NAMESPACE: &str = "spanloop";

// =============================================================================
// Object Storage
// =============================================================================

/// Default presigned URL lifetime (seconds)
pub const DEFAULT_TOS_TTL_SECS: u64 = 3600;

// =============================================================================
// Benefit
// =============================================================================

/// Default trace retention when no workspace override exists
pub const DEFAULT_STORAGE_DURATION_DAYS: i64 = 7;

/// Cache TTL for benefit records (10 min)
pub const CACHE_TTL_BENEFIT: u64 = 600;

// =============================================================================
// Cache
// =============================================================================

/// Cache key version prefix (bump when serialized shapes change)
pub const CACHE_KEY_VERSION: &str = "v1";

/// Default max entries of the in-memory cache
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;

// =============================================================================
// Shutdown
// =============================================================================

/// Graceful shutdown timeout in seconds
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 60;
