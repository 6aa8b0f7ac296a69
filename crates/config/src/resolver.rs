//! Tenant Config Resolver (C1, §4.1): `resolve(tenantId) -> TenantConfig`.
//!
//! Grounded on the teacher's dashmap-backed in-memory caches (e.g. the
//! connection/session caches in `voice-agent/backend`'s persistence and
//! server crates) — a concurrent map guarded only by the map itself, no
//! external lock, read-mostly workload.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::constants::DEFAULT_CACHE_TTL_SECS;
use crate::tenant::TenantConfig;

/// Supplies the raw, possibly-partial configuration for a tenant. A real
/// deployment backs this with a database or config service; tests and the
/// default resolver use an in-memory store.
pub trait TenantConfigSource: Send + Sync {
    fn load(&self, tenant_id: &str) -> Option<TenantConfig>;
}

/// A `TenantConfigSource` seeded entirely in memory — used for tests and as
/// the default when no external source is wired in.
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    configs: DashMap<String, TenantConfig>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config: TenantConfig) {
        self.configs.insert(config.tenant_id.clone(), config);
    }
}

impl TenantConfigSource for StaticConfigSource {
    fn load(&self, tenant_id: &str) -> Option<TenantConfig> {
        self.configs.get(tenant_id).map(|entry| entry.clone())
    }
}

struct CacheEntry {
    config: TenantConfig,
    resolved_at: Instant,
}

/// Resolves and caches per-tenant configuration (§4.1).
///
/// On a missing tenant, `resolve` returns a built-in default — it never
/// fails, since an unconfigured tenant must still be able to query.
pub struct TenantConfigResolver {
    source: Arc<dyn TenantConfigSource>,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl TenantConfigResolver {
    pub fn new(source: Arc<dyn TenantConfigSource>) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }

    pub fn with_ttl(source: Arc<dyn TenantConfigSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Resolves the effective `TenantConfig` for `tenant_id`, never failing.
    pub fn resolve(&self, tenant_id: &str) -> TenantConfig {
        if let Some(entry) = self.cache.get(tenant_id) {
            if entry.resolved_at.elapsed() < self.ttl {
                return entry.config.clone();
            }
        }

        let config = match self.source.load(tenant_id) {
            Some(config) => config,
            None => {
                debug!(tenant_id, "no explicit tenant config, using defaults");
                TenantConfig::default_for(tenant_id)
            }
        };

        self.cache.insert(
            tenant_id.to_string(),
            CacheEntry {
                config: config.clone(),
                resolved_at: Instant::now(),
            },
        );
        config
    }

    /// Drops any cached entry for `tenant_id`, forcing the next `resolve`
    /// call to re-read from the source.
    pub fn invalidate(&self, tenant_id: &str) {
        if self.cache.remove(tenant_id).is_none() {
            warn!(tenant_id, "invalidate called for tenant with no cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tenant_falls_back_to_default() {
        let resolver = TenantConfigResolver::new(Arc::new(StaticConfigSource::new()));
        let config = resolver.resolve("unknown-tenant");
        assert_eq!(config.tenant_id, "unknown-tenant");
        assert_eq!(config.retrieval.k_base, 12);
    }

    #[test]
    fn explicit_tenant_config_is_returned_and_cached() {
        let source = Arc::new(StaticConfigSource::new());
        let mut custom = TenantConfig::default_for("t1");
        custom.retrieval.k_base = 20;
        source.insert(custom);

        let resolver = TenantConfigResolver::new(source.clone());
        assert_eq!(resolver.resolve("t1").retrieval.k_base, 20);

        // Mutating the source after the first resolve should not affect the
        // cached value until invalidated.
        let mut changed = TenantConfig::default_for("t1");
        changed.retrieval.k_base = 99;
        source.insert(changed);
        assert_eq!(resolver.resolve("t1").retrieval.k_base, 20);

        resolver.invalidate("t1");
        assert_eq!(resolver.resolve("t1").retrieval.k_base, 99);
    }
}
