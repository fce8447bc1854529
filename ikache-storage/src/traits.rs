//! Cache contract and entry types

use std::time::Duration;

use async_trait::async_trait;
use ikache_core::ShapeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored result payload for one shape id.
///
/// Deliberately carries no dependency metadata; the engine is the sole
/// source of truth for dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: Value,
}

impl CacheEntry {
    pub fn new(result: Value) -> Self {
        Self { result }
    }
}

/// Uniform surface over cache backends.
///
/// Backend failures never escape an adapter: a failing `get` reads as a
/// miss and failing `set`/`del` are no-ops, so a broken backend costs
/// performance, not availability. `clear`, `size`, and `destroy` are
/// optional capabilities with no-op defaults.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up an entry. Absent, expired, and unreadable all read as None.
    async fn get(&self, key: &ShapeId) -> Option<CacheEntry>;

    /// Store an entry. A zero `ttl` falls back to the adapter's default.
    async fn set(&self, key: &ShapeId, entry: CacheEntry, ttl: Duration);

    /// Delete an entry if present.
    async fn del(&self, key: &ShapeId);

    /// Remove every entry.
    async fn clear(&self) {}

    /// Current entry count, when the backend can report one.
    async fn size(&self) -> Option<usize> {
        None
    }

    /// Release timers and backend handles.
    async fn destroy(&self) {}
}
