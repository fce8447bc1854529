//! IKACHE Storage - Cache Contract and Adapters
//!
//! A uniform get/set/delete surface over byte-addressable stores, plus the
//! two shipped adapters: an in-process LRU with TTL and a Redis-backed
//! prefixed cache. Adapters swallow their own backend failures; a broken
//! backend degrades the system to a pass-through, never an outage.

mod memory;
mod redis_backend;
mod traits;

pub use memory::{MemoryCache, MemoryCacheConfig};
pub use redis_backend::{RedisCache, RedisCacheConfig, RedisCacheError};
pub use traits::{Cache, CacheEntry};
