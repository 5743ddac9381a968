//! Read-through cache used in front of storage.
//!
//! Values are opaque strings; callers serialise what they store. Cache
//! failures are never fatal to a read, so callers log and fall through to
//! storage.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key-value cache with per-entry expiry.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: std::time::Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-process cache
///
/// Expired entries are dropped lazily on read and by [`run_cache_cleanup`].
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    prefix: String,
}

impl MemoryCache {
    /// Create a new cache
    ///
    /// # Arguments
    /// * `prefix` - Prepended to every key, so deployments sharing a cache do not collide
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Remove expired entries
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of stored entries, expired ones included until cleaned up
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let key = self.key(key);
        let now = Utc::now();

        let value = match self.entries.get(&key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if value.is_none() {
            self.entries.remove_if(&key, |_, entry| entry.expires_at <= now);
        }

        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: std::time::Duration) -> Result<(), CacheError> {
        let ttl = Duration::from_std(ttl).map_err(|e| CacheError::Unavailable(e.to_string()))?;

        self.entries.insert(
            self.key(key),
            CacheEntry {
                value,
                expires_at: Utc::now() + ttl,
            },
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(&self.key(key));
        Ok(())
    }
}

/// Background task to periodically drop expired cache entries
pub async fn run_cache_cleanup(cache: MemoryCache, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        cache.cleanup_expired();
        tracing::debug!(entries = cache.len(), "Cache cleanup complete");
    }
}
