/// Steward - replica-aware query routing and query result caching
///
/// Sits between application code and a primary/replica database cluster:
/// 1. Query routing: writes go to the primary, reads are spread over healthy
///    replicas and fall back to the primary when none qualifies
/// 2. Result caching: get-or-compute over a key-value store with model/tag
///    invalidation and stale-while-revalidate refresh
pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod logging;
pub mod router;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::cache::{CacheOptions, CacheStats, CacheStore, MemoryStore, QueryCacheManager, RedisStore};
pub use crate::config::Config;
pub use crate::core::{DatabaseClient, QueryKind, ReplicaConfig, ReplicaHealth};
pub use crate::error::{DatabaseError, StewardError, StewardResult};
pub use crate::router::{QueryRouter, RouterStats};

use std::future::Future;
use std::sync::Arc;

/// Build the cache store described by the configuration: Redis when an
/// address is configured, otherwise an in-process store.
pub fn cache_store_for(config: &Config) -> Arc<dyn CacheStore> {
    match &config.cache.redis_addr {
        Some(addr) => Arc::new(RedisStore::new(addr.clone())),
        None => Arc::new(MemoryStore::new()),
    }
}

/// Router, health monitor and cache manager wired from one `Config`
pub struct Steward<C: DatabaseClient> {
    config: Config,
    router: Arc<QueryRouter<C>>,
    cache: QueryCacheManager,
}

impl<C: DatabaseClient> Steward<C> {
    /// Connect to the primary and register the configured replicas.
    ///
    /// A replica that cannot be reached is skipped with a warning; any other
    /// error aborts startup.
    pub async fn new(config: Config, client: Arc<C>, store: Arc<dyn CacheStore>) -> StewardResult<Self> {
        config.validate()?;

        let router = QueryRouter::connect(client, config.router_config()).await?;
        for replica in config.replica_configs() {
            match router.add_replica(replica).await {
                Ok(()) => {}
                Err(StewardError::Replica { replica_id, message }) => {
                    tracing::warn!(replica_id = %replica_id, error = %message, "Skipping unreachable replica");
                }
                Err(e) => return Err(e),
            }
        }

        let cache = QueryCacheManager::new(store, config.cache_settings());

        Ok(Self {
            config,
            router: Arc::new(router),
            cache,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Arc<QueryRouter<C>> {
        &self.router
    }

    pub fn cache(&self) -> &QueryCacheManager {
        &self.cache
    }

    /// Start background replica health checks
    pub fn start(&self) {
        self.router.start_monitoring();
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            replicas = self.router.replica_ids().len(),
            cache_enabled = self.config.cache.enabled,
            "Steward started"
        );
    }

    /// Cache a read that is routed through the replica set on a miss
    pub async fn cached_read<T, F, Fut>(&self, op: F, options: CacheOptions) -> StewardResult<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
        F: Fn(Arc<C::Connection>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DatabaseError>> + Send + 'static,
    {
        let router = Arc::clone(&self.router);
        self.cache
            .get_cached(
                move || {
                    let router = Arc::clone(&router);
                    let op = op.clone();
                    async move { router.execute_read(op).await }
                },
                options,
            )
            .await
    }

    /// Stop health checks and release every connection. Idempotent.
    pub async fn shutdown(&self) {
        self.router.disconnect().await;
    }
}
