/// Query result cache with model/tag invalidation and stale-while-revalidate
///
/// Entries live in a `CacheStore` under `{prefix}{key}`. Model and tag
/// associations are written as index keys (`{prefix}idx:model:{model}:{key}`,
/// `{prefix}idx:tag:{tag}:{key}`) that outlive the entry by a second, so
/// invalidation is a pattern lookup followed by one bulk delete. Names are
/// escaped so that `:` inside a model or tag never reaches the separator.
///
/// Store failures never reach the caller of `get_cached`: the compute
/// function runs directly and its result is returned uncached.
pub mod redis;
#[cfg(test)]
pub(crate) mod resp;
pub mod store;

pub use self::redis::RedisStore;
pub use store::{CacheStore, MemoryStore};

use crate::error::{CacheStoreError, StewardResult};
use crate::utils::{escape_glob, generate_id};
use bytes::Bytes;
use dashmap::DashSet;
use futures::future::{join_all, BoxFuture};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Cache manager settings
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// When false `get_cached` is a pass-through
    pub enabled: bool,
    pub key_prefix: String,
    pub default_ttl: Duration,
    /// Hits with less remaining TTL than this trigger a background refresh
    pub stale_threshold: Duration,
    pub operation_timeout: Duration,
    pub warm_batch_size: usize,
    pub max_background_refreshes: usize,
    /// Mirror hit/miss counters into the store for a fleet-wide view
    pub distributed_stats: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "qc:".to_string(),
            default_ttl: Duration::from_secs(300),
            stale_threshold: Duration::from_secs(60),
            operation_timeout: Duration::from_millis(1000),
            warm_batch_size: 10,
            max_background_refreshes: 16,
            distributed_stats: false,
        }
    }
}

/// Per-call caching options
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub key: String,
    /// Falls back to the manager's default TTL
    pub ttl: Option<Duration>,
    pub models: Vec<String>,
    pub tags: Vec<String>,
    pub stale_while_revalidate: bool,
}

impl CacheOptions {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.models.push(model.into());
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn stale_while_revalidate(mut self) -> Self {
        self.stale_while_revalidate = true;
        self
    }
}

/// Cache counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub total_queries: u64,
    /// Store failures absorbed by falling back to direct computation
    pub errors: u64,
    pub background_refreshes: u64,
    /// Cache entries removed by invalidation
    pub invalidations: u64,
}

impl CacheStats {
    fn from_counts(hits: u64, misses: u64) -> Self {
        let total_queries = hits + misses;
        let hit_rate = if total_queries == 0 {
            0.0
        } else {
            hits as f64 / total_queries as f64
        };
        Self {
            hits,
            misses,
            hit_rate,
            total_queries,
            ..Default::default()
        }
    }
}

/// Boxed compute function used where entries of different closure types are mixed
pub type ComputeFn<T> = Arc<dyn Fn() -> BoxFuture<'static, StewardResult<T>> + Send + Sync>;

/// One entry for `warm_cache`
pub struct WarmEntry<T> {
    pub options: CacheOptions,
    pub compute: ComputeFn<T>,
}

impl<T> WarmEntry<T> {
    pub fn new<F, Fut>(options: CacheOptions, compute: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StewardResult<T>> + Send + 'static,
    {
        Self {
            options,
            compute: Arc::new(move || Box::pin(compute())),
        }
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    background_refreshes: AtomicU64,
    invalidations: AtomicU64,
}

struct CacheInner {
    store: Arc<dyn CacheStore>,
    settings: CacheSettings,
    counters: CacheCounters,
    refreshing: DashSet<String>,
    refresh_permits: Arc<Semaphore>,
}

/// Releases the per-key refresh slot however the refresh ends
struct RefreshGuard {
    inner: Arc<CacheInner>,
    key: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.inner.refreshing.remove(&self.key);
    }
}

/// Index keys outlive their entry so the entry is never unindexed
const INDEX_TTL_MARGIN: Duration = Duration::from_secs(1);

fn encode_payload<T: Serialize>(value: &T, key: &str) -> Option<Bytes> {
    match serde_json::to_vec(value) {
        Ok(payload) => Some(Bytes::from(payload)),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cannot serialize value for caching");
            None
        }
    }
}

/// Percent-escape `%` and `:` so a name can never contain the separator
fn escape_index_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl CacheInner {
    fn entry_key(&self, key: &str) -> String {
        format!("{}{}", self.settings.key_prefix, key)
    }

    fn index_prefix(&self, kind: &str, name: &str) -> String {
        format!(
            "{}idx:{}:{}:",
            self.settings.key_prefix,
            kind,
            escape_index_name(name)
        )
    }

    fn stats_key(&self, counter: &str) -> String {
        format!("{}stats:{}", self.settings.key_prefix, counter)
    }

    /// Bound a store call by the operation timeout and account failures
    async fn guarded<R, Fut>(&self, operation: &'static str, call: Fut) -> Result<R, CacheStoreError>
    where
        Fut: Future<Output = Result<R, CacheStoreError>>,
    {
        let result = match timeout(self.settings.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheStoreError::timeout(operation)),
        };
        if let Err(e) = &result {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(operation, error = %e, "Cache store operation failed");
        }
        result
    }

    async fn record_lookup(&self, hit: bool) {
        let (local, counter) = if hit {
            (&self.counters.hits, "hits")
        } else {
            (&self.counters.misses, "misses")
        };
        local.fetch_add(1, Ordering::Relaxed);

        if self.settings.distributed_stats {
            let key = self.stats_key(counter);
            let _ = self.guarded("increment", self.store.increment(&key)).await;
        }
    }

    /// Write the index keys, then the entry. Failures are logged and leave
    /// the value uncached; an entry is never live without its index keys.
    async fn store_payload(&self, payload: Bytes, options: &CacheOptions) -> bool {
        let ttl = options.ttl.unwrap_or(self.settings.default_ttl);
        let index_ttl = ttl + INDEX_TTL_MARGIN;

        let indexes = options
            .models
            .iter()
            .map(|model| self.index_prefix("model", model))
            .chain(options.tags.iter().map(|tag| self.index_prefix("tag", tag)));
        for index in indexes {
            let index_key = format!("{}{}", index, options.key);
            let marker = Bytes::from(options.key.clone());
            if self
                .guarded("set", self.store.set_with_ttl(&index_key, marker, index_ttl))
                .await
                .is_err()
            {
                return false;
            }
        }

        let key = self.entry_key(&options.key);
        self.guarded("set", self.store.set_with_ttl(&key, payload, ttl))
            .await
            .is_ok()
    }

    async fn invalidate_index(&self, kind: &str, name: &str) -> StewardResult<u64> {
        let prefix = self.index_prefix(kind, name);
        let pattern = format!("{}*", escape_glob(&prefix));
        let index_keys = self
            .guarded("keys", self.store.keys_matching(&pattern))
            .await?;
        if index_keys.is_empty() {
            return Ok(0);
        }

        let entry_keys: Vec<String> = index_keys
            .iter()
            .filter_map(|index_key| index_key.strip_prefix(&prefix))
            .map(|key| self.entry_key(key))
            .collect();
        let removed = self
            .guarded("delete", self.store.delete_many(&entry_keys))
            .await?;
        self.guarded("delete", self.store.delete_many(&index_keys))
            .await?;

        self.counters.invalidations.fetch_add(removed, Ordering::Relaxed);
        tracing::info!(kind, name, removed, "Cache entries invalidated");
        Ok(removed)
    }
}

/// Get-or-compute cache over a `CacheStore`
///
/// Cheap to clone; clones share counters and the refresh guard.
#[derive(Clone)]
pub struct QueryCacheManager {
    inner: Arc<CacheInner>,
}

impl QueryCacheManager {
    pub fn new(store: Arc<dyn CacheStore>, settings: CacheSettings) -> Self {
        let permits = settings.max_background_refreshes.max(1);
        Self {
            inner: Arc::new(CacheInner {
                store,
                settings,
                counters: CacheCounters::default(),
                refreshing: DashSet::new(),
                refresh_permits: Arc::new(Semaphore::new(permits)),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub fn store(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.inner.store)
    }

    /// Return the cached value for `options.key`, computing and storing it on a miss
    pub async fn get_cached<T, F, Fut>(&self, compute: F, options: CacheOptions) -> StewardResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StewardResult<T>> + Send + 'static,
    {
        if !self.inner.settings.enabled {
            return compute().await;
        }

        let key = self.inner.entry_key(&options.key);
        match self.inner.guarded("get", self.inner.store.get(&key)).await {
            Ok(Some(payload)) => match serde_json::from_slice::<T>(&payload) {
                Ok(value) => {
                    self.inner.record_lookup(true).await;
                    tracing::debug!(key = %options.key, "Cache hit");
                    if options.stale_while_revalidate {
                        self.revalidate_if_stale(&key, compute, options).await;
                    }
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(key = %options.key, error = %e, "Discarding undecodable cache entry");
                }
            },
            Ok(None) => {}
            Err(_) => return compute().await,
        }

        self.inner.record_lookup(false).await;
        tracing::debug!(key = %options.key, "Cache miss");
        let value = compute().await?;
        if let Some(payload) = encode_payload(&value, &options.key) {
            self.inner.store_payload(payload, &options).await;
        }
        Ok(value)
    }

    async fn revalidate_if_stale<T, F, Fut>(&self, key: &str, compute: F, options: CacheOptions)
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StewardResult<T>> + Send + 'static,
    {
        let remaining = match self.inner.guarded("ttl", self.inner.store.ttl_remaining(key)).await {
            Ok(Some(remaining)) => remaining,
            _ => return,
        };
        if remaining >= self.inner.settings.stale_threshold {
            return;
        }
        if !self.inner.refreshing.insert(key.to_string()) {
            return;
        }
        let guard = RefreshGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
        };

        let Ok(permit) = Arc::clone(&self.inner.refresh_permits).try_acquire_owned() else {
            tracing::debug!(key = %options.key, "Background refresh capacity exhausted");
            return;
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            let refresh_id = generate_id("refresh");
            tracing::debug!(key = %options.key, %refresh_id, "Refreshing stale cache entry");

            match compute().await {
                Ok(value) => {
                    let Some(payload) = encode_payload(&value, &options.key) else {
                        return;
                    };
                    if inner.store_payload(payload, &options).await {
                        inner
                            .counters
                            .background_refreshes
                            .fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    tracing::warn!(key = %options.key, %refresh_id, error = %e, "Background refresh failed");
                }
            }
        });
    }

    /// Remove one entry. Index entries pointing at it expire on their own.
    pub async fn invalidate(&self, key: &str) -> StewardResult<bool> {
        let removed = self
            .inner
            .guarded("delete", self.inner.store.delete(&self.inner.entry_key(key)))
            .await?;
        if removed {
            self.inner.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    /// Remove every entry cached under `model`
    pub async fn invalidate_model(&self, model: &str) -> StewardResult<u64> {
        self.inner.invalidate_index("model", model).await
    }

    /// Remove every entry cached under `tag`
    pub async fn invalidate_tag(&self, tag: &str) -> StewardResult<u64> {
        self.inner.invalidate_index("tag", tag).await
    }

    /// Remove all entries and index keys under the prefix. Distributed
    /// counters are kept.
    pub async fn clear_all(&self) -> StewardResult<u64> {
        let pattern = format!("{}*", escape_glob(&self.inner.settings.key_prefix));
        let stats_prefix = self.inner.stats_key("");
        let keys: Vec<String> = self
            .inner
            .guarded("keys", self.inner.store.keys_matching(&pattern))
            .await?
            .into_iter()
            .filter(|key| !key.starts_with(&stats_prefix))
            .collect();

        let removed = self
            .inner
            .guarded("delete", self.inner.store.delete_many(&keys))
            .await?;
        tracing::info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Compute and store entries ahead of demand, `warm_batch_size` at a
    /// time. Failing entries are logged and skipped; returns how many were
    /// stored.
    pub async fn warm_cache<T>(&self, entries: Vec<WarmEntry<T>>) -> usize
    where
        T: Serialize + Send + 'static,
    {
        if !self.inner.settings.enabled {
            return 0;
        }

        let batch_size = self.inner.settings.warm_batch_size.max(1);
        let mut warmed = 0;
        for batch in entries.chunks(batch_size) {
            let results = join_all(batch.iter().map(|entry| async move {
                match (entry.compute)().await {
                    Ok(value) => match encode_payload(&value, &entry.options.key) {
                        Some(payload) => self.inner.store_payload(payload, &entry.options).await,
                        None => false,
                    },
                    Err(e) => {
                        tracing::warn!(key = %entry.options.key, error = %e, "Cache warm-up entry failed");
                        false
                    }
                }
            }))
            .await;
            warmed += results.into_iter().filter(|stored| *stored).count();
        }

        tracing::info!(warmed, "Cache warm-up complete");
        warmed
    }

    pub fn get_stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            errors: counters.errors.load(Ordering::Relaxed),
            background_refreshes: counters.background_refreshes.load(Ordering::Relaxed),
            invalidations: counters.invalidations.load(Ordering::Relaxed),
            ..CacheStats::from_counts(
                counters.hits.load(Ordering::Relaxed),
                counters.misses.load(Ordering::Relaxed),
            )
        }
    }

    /// Zero the local counters
    pub fn reset_stats(&self) {
        let counters = &self.inner.counters;
        counters.hits.store(0, Ordering::Relaxed);
        counters.misses.store(0, Ordering::Relaxed);
        counters.errors.store(0, Ordering::Relaxed);
        counters.background_refreshes.store(0, Ordering::Relaxed);
        counters.invalidations.store(0, Ordering::Relaxed);
    }

    /// Hit/miss totals summed over every manager sharing the store. Only
    /// meaningful with `distributed_stats` enabled.
    pub async fn global_stats(&self) -> StewardResult<CacheStats> {
        let mut counts = [0u64; 2];
        for (slot, counter) in counts.iter_mut().zip(["hits", "misses"]) {
            let key = self.inner.stats_key(counter);
            let raw = self.inner.guarded("get", self.inner.store.get(&key)).await?;
            *slot = raw
                .and_then(|bytes| std::str::from_utf8(&bytes).ok()?.parse().ok())
                .unwrap_or(0);
        }
        Ok(CacheStats::from_counts(counts[0], counts[1]))
    }
}
