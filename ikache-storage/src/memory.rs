//! In-process LRU cache with TTL
//!
//! Eviction follows a re-insertion discipline: `get` bumps an entry's
//! sequence number, so the capacity victim is always the entry with the
//! oldest insertion or re-insertion. An optional background sweep removes
//! expired entries between reads; the sweep task never keeps the process
//! alive and stops when the cache is destroyed or dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ikache_core::ShapeId;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::traits::{Cache, CacheEntry};

/// Configuration for [`MemoryCache`].
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Capacity bound; the oldest entry is evicted on overflow.
    pub max_items: usize,
    /// TTL applied when `set` is called with a zero duration.
    pub default_ttl: Duration,
    /// Period of the background expiry sweep. None disables the sweep;
    /// expired entries are then dropped lazily on access.
    pub cleanup_interval: Option<Duration>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_items: 10_000,
            default_ttl: Duration::from_secs(30),
            cleanup_interval: None,
        }
    }
}

impl MemoryCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_cleanup_interval(mut self, every: Duration) -> Self {
        self.cleanup_interval = Some(every);
        self
    }
}

struct Slot {
    entry: CacheEntry,
    expires_at: Instant,
    sequence: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    next_sequence: u64,
}

/// Bounded in-process cache.
///
/// When a cleanup interval is configured, construction must happen inside
/// a tokio runtime so the sweep task can be spawned.
pub struct MemoryCache {
    inner: Arc<Mutex<Inner>>,
    config: MemoryCacheConfig,
    sweep_shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        let inner = Arc::new(Mutex::new(Inner::default()));
        let sweep_shutdown = config.cleanup_interval.map(|every| {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(sweep_task(Arc::downgrade(&inner), every, rx));
            tx
        });
        Self {
            inner,
            config,
            sweep_shutdown: Mutex::new(sweep_shutdown),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MemoryCacheConfig::default())
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &ShapeId) -> Option<CacheEntry> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let sequence = inner.next_sequence;
        let hit = match inner.slots.get_mut(key.as_str()) {
            None => return None,
            Some(slot) if now >= slot.expires_at => None,
            Some(slot) => {
                // Re-insertion discipline: a read makes this entry the
                // most recently inserted.
                slot.sequence = sequence;
                Some(slot.entry.clone())
            }
        };
        match hit {
            None => {
                inner.slots.remove(key.as_str());
                None
            }
            hit => {
                inner.next_sequence += 1;
                hit
            }
        }
    }

    async fn set(&self, key: &ShapeId, entry: CacheEntry, ttl: Duration) {
        let ttl = if ttl.is_zero() {
            self.config.default_ttl
        } else {
            ttl
        };
        let mut inner = self.inner.lock().unwrap();
        let over_capacity = inner.slots.len() >= self.config.max_items
            && !inner.slots.contains_key(key.as_str());
        if over_capacity {
            let victim = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.sequence)
                .map(|(key, _)| key.clone());
            if let Some(victim) = victim {
                inner.slots.remove(&victim);
            }
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.slots.insert(
            key.as_str().to_string(),
            Slot {
                entry,
                expires_at: Instant::now() + ttl,
                sequence,
            },
        );
    }

    async fn del(&self, key: &ShapeId) {
        self.inner.lock().unwrap().slots.remove(key.as_str());
    }

    async fn clear(&self) {
        self.inner.lock().unwrap().slots.clear();
    }

    async fn size(&self) -> Option<usize> {
        Some(self.inner.lock().unwrap().slots.len())
    }

    async fn destroy(&self) {
        if let Some(shutdown) = self.sweep_shutdown.lock().unwrap().take() {
            let _ = shutdown.send(true);
        }
        self.inner.lock().unwrap().slots.clear();
        tracing::debug!("Memory cache destroyed");
    }
}

/// Periodic expiry sweep. Exits when the cache is destroyed or dropped.
async fn sweep_task(
    inner: Weak<Mutex<Inner>>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                let removed = {
                    let mut inner = inner.lock().unwrap();
                    let now = Instant::now();
                    let before = inner.slots.len();
                    inner.slots.retain(|_, slot| slot.expires_at > now);
                    before - inner.slots.len()
                };
                if removed > 0 {
                    tracing::debug!(removed, "Expired cache entries swept");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(tag: &str) -> CacheEntry {
        CacheEntry::new(json!({ "tag": tag }))
    }

    #[tokio::test]
    async fn test_get_returns_stored_entry() {
        let cache = MemoryCache::with_defaults();
        let key = ShapeId::from("S1");
        cache.set(&key, entry("a"), Duration::from_secs(5)).await;
        assert_eq!(cache.get(&key).await, Some(entry("a")));
        assert_eq!(cache.size().await, Some(1));
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = MemoryCache::with_defaults();
        let key = ShapeId::from("S1");
        cache.set(&key, entry("a"), Duration::from_millis(20)).await;
        assert!(cache.get(&key).await.is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get(&key).await, None);
        // The expired slot is dropped eagerly on access.
        assert_eq!(cache.size().await, Some(0));
    }

    #[tokio::test]
    async fn test_zero_ttl_falls_back_to_default() {
        let cache = MemoryCache::new(
            MemoryCacheConfig::new().with_default_ttl(Duration::from_secs(60)),
        );
        let key = ShapeId::from("S1");
        cache.set(&key, entry("a"), Duration::ZERO).await;
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_capacity_bound_evicts_oldest_insertion() {
        let cache = MemoryCache::new(MemoryCacheConfig::new().with_max_items(2));
        let (a, b, c) = (ShapeId::from("A"), ShapeId::from("B"), ShapeId::from("C"));
        cache.set(&a, entry("a"), Duration::from_secs(5)).await;
        cache.set(&b, entry("b"), Duration::from_secs(5)).await;
        cache.set(&c, entry("c"), Duration::from_secs(5)).await;

        assert_eq!(cache.size().await, Some(2));
        assert_eq!(cache.get(&a).await, None);
        assert!(cache.get(&b).await.is_some());
        assert!(cache.get(&c).await.is_some());
    }

    #[tokio::test]
    async fn test_read_reinsertion_changes_the_victim() {
        let cache = MemoryCache::new(MemoryCacheConfig::new().with_max_items(2));
        let (a, b, c) = (ShapeId::from("A"), ShapeId::from("B"), ShapeId::from("C"));
        cache.set(&a, entry("a"), Duration::from_secs(5)).await;
        cache.set(&b, entry("b"), Duration::from_secs(5)).await;
        // Reading A re-inserts it, so B becomes the oldest.
        cache.get(&a).await;
        cache.set(&c, entry("c"), Duration::from_secs(5)).await;

        assert!(cache.get(&a).await.is_some());
        assert_eq!(cache.get(&b).await, None);
        assert!(cache.get(&c).await.is_some());
    }

    #[tokio::test]
    async fn test_overwriting_at_capacity_does_not_evict() {
        let cache = MemoryCache::new(MemoryCacheConfig::new().with_max_items(2));
        let (a, b) = (ShapeId::from("A"), ShapeId::from("B"));
        cache.set(&a, entry("a1"), Duration::from_secs(5)).await;
        cache.set(&b, entry("b"), Duration::from_secs(5)).await;
        cache.set(&a, entry("a2"), Duration::from_secs(5)).await;

        assert_eq!(cache.get(&a).await, Some(entry("a2")));
        assert!(cache.get(&b).await.is_some());
    }

    mod capacity_properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Set(u8),
            Get(u8),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![(0u8..16).prop_map(Op::Set), (0u8..16).prop_map(Op::Get)]
        }

        proptest! {
            // Random get/set traffic never exceeds the capacity bound,
            // membership matches a model tracking insertion/re-insertion
            // order, and overflow always evicts the oldest entry.
            #[test]
            fn capacity_bound_holds_under_random_traffic(
                ops in proptest::collection::vec(op_strategy(), 1..64),
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let max_items = 4;
                    let cache = MemoryCache::new(
                        MemoryCacheConfig::new().with_max_items(max_items),
                    );
                    // Oldest-first model of insertion/re-insertion order.
                    let mut order: Vec<String> = Vec::new();

                    for op in &ops {
                        match op {
                            Op::Set(k) => {
                                let key = ShapeId::from(format!("S{k}"));
                                cache
                                    .set(&key, entry("v"), Duration::from_secs(60))
                                    .await;
                                let name = key.as_str().to_string();
                                if let Some(pos) =
                                    order.iter().position(|existing| *existing == name)
                                {
                                    order.remove(pos);
                                } else if order.len() == max_items {
                                    let victim = order.remove(0);
                                    prop_assert!(
                                        cache.get(&ShapeId::from(victim.as_str())).await.is_none()
                                    );
                                }
                                order.push(name);
                            }
                            Op::Get(k) => {
                                let key = ShapeId::from(format!("S{k}"));
                                let name = key.as_str().to_string();
                                let hit = cache.get(&key).await.is_some();
                                let pos =
                                    order.iter().position(|existing| *existing == name);
                                prop_assert_eq!(hit, pos.is_some());
                                if let Some(pos) = pos {
                                    order.remove(pos);
                                    order.push(name);
                                }
                            }
                        }
                        prop_assert!(cache.size().await.unwrap_or(0) <= max_items);
                    }
                    Ok(())
                })?;
            }
        }
    }

    #[tokio::test]
    async fn test_background_sweep_removes_expired_entries() {
        let cache = MemoryCache::new(
            MemoryCacheConfig::new().with_cleanup_interval(Duration::from_millis(10)),
        );
        let key = ShapeId::from("S1");
        cache.set(&key, entry("a"), Duration::from_millis(15)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        // Swept without any access to the key.
        assert_eq!(cache.size().await, Some(0));
    }

    #[tokio::test]
    async fn test_destroy_clears_and_stops_the_sweep() {
        let cache = MemoryCache::new(
            MemoryCacheConfig::new().with_cleanup_interval(Duration::from_millis(10)),
        );
        let key = ShapeId::from("S1");
        cache.set(&key, entry("a"), Duration::from_secs(5)).await;
        cache.destroy().await;
        assert_eq!(cache.size().await, Some(0));
        // Destroy is idempotent.
        cache.destroy().await;
    }
}
