//! Redis-backed cache adapter with key prefixing
//!
//! Every key is namespaced under a configured prefix so several ikache
//! instances can share one Redis. Failures are logged at warn level and
//! swallowed: a failing `get` reads as a miss, failing `set`/`del` are
//! no-ops. The system stays live through backend outages at the cost of
//! extra database reads.

use std::time::Duration;

use async_trait::async_trait;
use ikache_core::ShapeId;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::traits::{Cache, CacheEntry};

/// Configuration for [`RedisCache`].
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    pub url: String,
    /// Prepended to every key.
    pub prefix: String,
    /// TTL applied when `set` is called with a zero duration.
    pub default_ttl: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: "ik:".to_string(),
            default_ttl: Duration::from_secs(30),
        }
    }
}

impl RedisCacheConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Error type for Redis cache operations.
///
/// Only construction surfaces errors; runtime failures are swallowed per
/// the adapter's error policy.
#[derive(Debug, thiserror::Error)]
pub enum RedisCacheError {
    #[error("Invalid Redis connection URL: {0}")]
    InvalidUrl(#[from] redis::RedisError),
}

/// Remote prefixed cache over Redis.
#[derive(Debug)]
pub struct RedisCache {
    client: redis::Client,
    config: RedisCacheConfig,
}

impl RedisCache {
    pub fn new(config: RedisCacheConfig) -> Result<Self, RedisCacheError> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RedisCacheConfig {
        &self.config
    }

    fn prefixed(&self, key: &ShapeId) -> String {
        format!("{}{}", self.config.prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn read(&self, cache_key: &str) -> Result<Option<CacheEntry>, String> {
        let mut conn = self.connection().await.map_err(|e| e.to_string())?;
        let payload: Option<Vec<u8>> = conn.get(cache_key).await.map_err(|e| e.to_string())?;
        match payload {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| format!("stored entry is not valid JSON: {e}")),
        }
    }

    async fn write(
        &self,
        cache_key: &str,
        entry: &CacheEntry,
        ttl_seconds: u64,
    ) -> Result<(), String> {
        let payload = serde_json::to_vec(entry).map_err(|e| e.to_string())?;
        let mut conn = self.connection().await.map_err(|e| e.to_string())?;
        let _: () = conn
            .set_ex(cache_key, payload, ttl_seconds)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn remove(&self, cache_key: &str) -> Result<(), String> {
        let mut conn = self.connection().await.map_err(|e| e.to_string())?;
        let _: () = conn.del(cache_key).await.map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Cursor-based scan-and-delete of every prefixed key. Not atomic:
    /// keys written while the scan runs may survive.
    async fn scan_delete(&self) -> Result<(), String> {
        let mut conn = self.connection().await.map_err(|e| e.to_string())?;
        let pattern = format!("{}*", self.config.prefix);
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| e.to_string())?;
            if !keys.is_empty() {
                let _: () = conn.del(keys).await.map_err(|e| e.to_string())?;
            }
            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &ShapeId) -> Option<CacheEntry> {
        let cache_key = self.prefixed(key);
        match self.read(&cache_key).await {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(key = %cache_key, %error, "Redis get failed; treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &ShapeId, entry: CacheEntry, ttl: Duration) {
        let ttl = if ttl.is_zero() {
            self.config.default_ttl
        } else {
            ttl
        };
        let cache_key = self.prefixed(key);
        if let Err(error) = self.write(&cache_key, &entry, ttl_whole_seconds(ttl)).await {
            tracing::warn!(key = %cache_key, %error, "Redis set failed; entry not cached");
        }
    }

    async fn del(&self, key: &ShapeId) {
        let cache_key = self.prefixed(key);
        if let Err(error) = self.remove(&cache_key).await {
            tracing::warn!(key = %cache_key, %error, "Redis del failed; entry may linger until TTL");
        }
    }

    async fn clear(&self) {
        if let Err(error) = self.scan_delete().await {
            tracing::warn!(prefix = %self.config.prefix, %error, "Redis clear failed");
        }
    }
}

/// Round a TTL up to whole seconds; Redis expiry has second granularity.
fn ttl_whole_seconds(ttl: Duration) -> u64 {
    let seconds = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    seconds.max(1)
}
