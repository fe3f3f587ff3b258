//! Cache key builders

use crate::core::constants::CACHE_KEY_VERSION;

/// Cache key builder
///
/// Value keys carry a version prefix (e.g. "v1:") so cached data can be
/// invalidated wholesale on schema changes. Counter keys used by the ID
/// generator are shared with other deployments and stay unversioned.
pub struct CacheKey;

impl CacheKey {
    /// Counter key for one (namespace, server id, millisecond) slot
    pub fn id_counter(namespace: &str, server_id: u16, ms: i64) -> String {
        format!("id_generator:{}:{}:{}", namespace, server_id, ms)
    }

    /// Cached trace benefit for a workspace
    pub fn trace_benefit(workspace_id: &str) -> String {
        format!("{}:benefit:trace:{}", CACHE_KEY_VERSION, workspace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_counter_key() {
        assert_eq!(
            CacheKey::id_counter("spanloop", 7, 1_700_000_000_123),
            "id_generator:spanloop:7:1700000000123"
        );
    }

    #[test]
    fn test_trace_benefit_key_is_versioned() {
        let key = CacheKey::trace_benefit("ws-1");
        assert!(key.starts_with(CACHE_KEY_VERSION));
        assert!(key.ends_with(":benefit:trace:ws-1"));
    }
}
