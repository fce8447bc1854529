//! Diagnostics surface
//!
//! Operational introspection over a running client: engine version, cache
//! health, invalidation explanations, and the reset/destroy lifecycle.

use ikache_core::{IkacheResult, Mutation, ShapeId};
use ikache_engine::{EngineVersion, ExplainRequest, InvalidationExplanation};
use serde::Serialize;

use crate::coordinator::{QueryCoordinator, StatsSnapshot};

/// Aggregate cache health.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsReport {
    /// Current cache size; 0 when the backend cannot report one.
    pub size: usize,
    /// `cache_hits / total_requests`; 0 before any request.
    pub hit_rate: f64,
}

#[derive(Clone)]
pub struct Diagnostics {
    coordinator: QueryCoordinator,
}

impl Diagnostics {
    pub(crate) fn new(coordinator: QueryCoordinator) -> Self {
        Self { coordinator }
    }

    /// Engine version strings.
    pub async fn version(&self) -> IkacheResult<EngineVersion> {
        self.coordinator.engine().version().await
    }

    pub async fn cache_stats(&self) -> CacheStatsReport {
        let size = self.coordinator.cache().size().await.unwrap_or(0);
        CacheStatsReport {
            size,
            hit_rate: self.coordinator.stats().hit_rate(),
        }
    }

    /// Raw coordinator counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.coordinator.stats()
    }

    /// Would this mutation invalidate this shape, and why.
    pub async fn explain_invalidation(
        &self,
        mutation: Mutation,
        shape_id: ShapeId,
    ) -> IkacheResult<InvalidationExplanation> {
        self.coordinator
            .engine()
            .explain_invalidation(&ExplainRequest { mutation, shape_id })
            .await
    }

    /// Drop all tracked queries from the engine, then clear the cache.
    pub async fn reset(&self) -> IkacheResult<()> {
        self.coordinator.engine().reset().await?;
        self.coordinator.cache().clear().await;
        Ok(())
    }

    /// Release cache timers and backend handles. The client must not be
    /// used afterwards.
    pub async fn destroy(&self) {
        self.coordinator.cache().destroy().await;
    }
}
