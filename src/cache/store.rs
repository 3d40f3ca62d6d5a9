/// Cache backing store abstraction and the in-process implementation
use crate::error::CacheStoreError;
use crate::utils::glob_match;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Key-value store holding cached payloads and their index entries
///
/// Patterns passed to `keys_matching` use Redis glob syntax.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheStoreError>;

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration)
        -> Result<(), CacheStoreError>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError>;

    /// Returns the number of keys removed
    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheStoreError>;

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheStoreError>;

    /// Atomically add one to a counter, creating it at zero
    async fn increment(&self, key: &str) -> Result<i64, CacheStoreError>;

    /// `None` when the key is missing or never expires
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, CacheStoreError>;

    async fn ping(&self) -> Result<(), CacheStoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store with per-entry expiry
///
/// Expired entries are dropped lazily when touched or listed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<MemoryEntry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheStoreError> {
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheStoreError> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheStoreError> {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn increment(&self, key: &str) -> Result<i64, CacheStoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: Bytes::from_static(b"0"),
            expires_at: None,
        });
        if entry.is_expired(now) {
            *entry = MemoryEntry {
                value: Bytes::from_static(b"0"),
                expires_at: None,
            };
        }

        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                CacheStoreError::command("INCR", "value is not an integer or out of range")
            })?;
        let next = current + 1;
        entry.value = Bytes::from(next.to_string());
        Ok(next)
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, CacheStoreError> {
        let now = Instant::now();
        Ok(self
            .live(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }
}
