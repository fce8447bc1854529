//! Cache coordinator
//!
//! The component every read and write flows through. Reads resolve in
//! order: cache hit, shared in-flight execution, fresh execution (which
//! registers dependencies with the engine before the entry becomes
//! visible). Writes obtain their eviction set from the engine before the
//! database runs, and either buffer it under an active transaction or
//! apply it immediately on success.
//!
//! Invariants owned here: at most one in-flight execution per shape id, a
//! failed write contributes zero evictions, buffered evictions apply
//! atomically on commit and vanish on rollback.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ikache_core::{
    DbError, IkacheError, IkacheResult, InsightsEvent, Mutation, ShapeId, Statement,
};
use ikache_engine::{DependencyEngine, QueryRegistration};
use ikache_storage::{Cache, CacheEntry};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::flight::{await_outcome, FlightMap, FlightOutcome, FlightRole};
use crate::txbuffer::{TransactionContext, TxBufferMap};

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// TTL handed to the cache for fresh entries.
    pub default_ttl: Duration,
    /// Upper bound on awaiting an in-flight execution.
    pub single_flight_timeout: Duration,
    /// Capacity of the insights broadcast channel.
    pub insights_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
            single_flight_timeout: Duration::from_secs(10),
            insights_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_single_flight_timeout(mut self, timeout: Duration) -> Self {
        self.single_flight_timeout = timeout;
        self
    }

    pub fn with_insights_capacity(mut self, capacity: usize) -> Self {
        self.insights_capacity = capacity;
        self
    }
}

#[derive(Debug, Default)]
struct CoordinatorStats {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time view of the coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
}

impl StatsSnapshot {
    /// Hit rate over all requests (0.0 to 1.0); 0 before any request.
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64
        }
    }
}

/// Orchestrates reads and writes over the engine and the cache.
///
/// Cheap to clone; clones share all state. Collaborators carry their own
/// synchronization, and the maps here are locked only between suspension
/// points.
#[derive(Clone)]
pub struct QueryCoordinator {
    engine: Arc<dyn DependencyEngine>,
    cache: Arc<dyn Cache>,
    config: CoordinatorConfig,
    flights: Arc<FlightMap>,
    buffers: Arc<TxBufferMap>,
    stats: Arc<CoordinatorStats>,
    insights: broadcast::Sender<InsightsEvent>,
}

impl QueryCoordinator {
    pub fn new(
        engine: Arc<dyn DependencyEngine>,
        cache: Arc<dyn Cache>,
        config: CoordinatorConfig,
    ) -> Self {
        let (insights, _) = broadcast::channel(config.insights_capacity.max(1));
        Self {
            engine,
            cache,
            config,
            flights: Arc::new(FlightMap::new()),
            buffers: Arc::new(TxBufferMap::new()),
            stats: Arc::new(CoordinatorStats::default()),
            insights,
        }
    }

    /// Execute a read through the cache.
    ///
    /// `execute` performs the real database call; it runs at most once per
    /// in-flight shape id regardless of how many callers race. On a fresh
    /// miss the engine registers the query's dependencies before the entry
    /// becomes readable.
    pub async fn execute_read<F, Fut>(
        &self,
        statement: Statement,
        execute: F,
        result_hint: Option<Value>,
    ) -> IkacheResult<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, DbError>> + Send + 'static,
    {
        let shape_id = self.engine.compute_shape_id(&statement).await?;
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = self.cache.get(&shape_id).await {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.emit(InsightsEvent::hit(shape_id));
            return Ok(entry.result);
        }

        let (generation, outcome) = match self.flights.join(&shape_id) {
            FlightRole::Follower {
                generation,
                outcome,
            } => (generation, outcome),
            FlightRole::Leader {
                generation,
                publisher,
                outcome,
            } => {
                self.spawn_flight(
                    shape_id.clone(),
                    generation,
                    publisher,
                    statement,
                    execute,
                    result_hint,
                );
                (generation, outcome)
            }
        };

        await_outcome(
            &self.flights,
            &shape_id,
            generation,
            outcome,
            self.config.single_flight_timeout,
        )
        .await
    }

    /// Execute a write, evicting the shapes it invalidates.
    ///
    /// The eviction set is computed against the engine's pre-write view,
    /// strictly before `execute` runs. A failed write leaves the cache
    /// untouched. Under an active transaction buffer the set accumulates
    /// instead of applying.
    pub async fn execute_write<F, Fut>(
        &self,
        mutation: Mutation,
        execute: F,
        tx: Option<&TransactionContext>,
    ) -> IkacheResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, DbError>>,
    {
        let invalidation = self.engine.invalidate(&mutation).await?;
        let result = execute().await.map_err(IkacheError::Database)?;

        let buffered = tx.is_some_and(|tx| self.buffers.buffer(tx, &invalidation.evict));
        if !buffered {
            self.apply_evictions(invalidation.evict).await;
        }
        Ok(result)
    }

    /// Open an eviction buffer for a transaction. Callers must not begin
    /// twice for one handle.
    pub fn begin(&self, tx: &Arc<TransactionContext>) {
        self.buffers.begin(tx);
    }

    /// Apply and drop a transaction's buffered evictions. No-op for an
    /// unknown handle.
    pub async fn commit(&self, tx: &TransactionContext) {
        if let Some(shapes) = self.buffers.take(tx) {
            self.apply_evictions(shapes.into_iter().collect()).await;
        }
    }

    /// Drop a transaction's buffered evictions without applying them.
    /// No-op for an unknown handle.
    pub fn rollback(&self, tx: &TransactionContext) {
        self.buffers.discard(tx);
    }

    /// Subscribe to hit/miss/evict insights. Delivery is best-effort; a
    /// lagging subscriber loses old events, never affects operations.
    pub fn subscribe_insights(&self) -> broadcast::Receiver<InsightsEvent> {
        self.insights.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.stats.total_requests.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn engine(&self) -> &Arc<dyn DependencyEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn emit(&self, event: InsightsEvent) {
        let _ = self.insights.send(event);
    }

    /// Run the flight body on its own task so a slow execution survives
    /// waiter timeouts and can still be identity-checked on completion.
    fn spawn_flight<F, Fut>(
        &self,
        shape_id: ShapeId,
        generation: u64,
        publisher: watch::Sender<Option<FlightOutcome>>,
        statement: Statement,
        execute: F,
        result_hint: Option<Value>,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, DbError>> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let cache = Arc::clone(&self.cache);
        let flights = Arc::clone(&self.flights);
        let stats = Arc::clone(&self.stats);
        let insights = self.insights.clone();
        let ttl = self.config.default_ttl;

        tokio::spawn(async move {
            let run = async {
                let result = execute().await.map_err(IkacheError::Database)?;
                let registration = QueryRegistration {
                    shape: statement,
                    result_hint: Some(result_hint.unwrap_or_else(|| result.clone())),
                };
                let registered = engine.add_query(&registration).await?;
                Ok::<_, IkacheError>((result, registered.dependencies_summary()))
            };

            match run.await {
                Ok((result, summary)) => {
                    if flights.is_current(&shape_id, generation) {
                        // The entry becomes readable only after set returns.
                        cache
                            .set(&shape_id, CacheEntry::new(result.clone()), ttl)
                            .await;
                        stats.cache_misses.fetch_add(1, Ordering::Relaxed);
                        let _ = insights.send(InsightsEvent::miss(shape_id.clone(), summary));
                        flights.release_if_current(&shape_id, generation);
                    } else {
                        // A waiter timeout released this flight; the late
                        // result reaches residual waiters but is never
                        // cached and never registered as a miss.
                        tracing::debug!(
                            shape_id = %shape_id,
                            "Discarding completion of a released in-flight query"
                        );
                    }
                    let _ = publisher.send(Some(Ok(result)));
                }
                Err(error) => {
                    flights.release_if_current(&shape_id, generation);
                    let _ = publisher.send(Some(Err(error)));
                }
            }
        });
    }

    /// Delete each shape from the cache concurrently, unordered, emitting
    /// one evict insight per element.
    async fn apply_evictions(&self, shape_ids: Vec<ShapeId>) {
        let mut deletions = Vec::with_capacity(shape_ids.len());
        for shape_id in shape_ids {
            let cache = Arc::clone(&self.cache);
            deletions.push(tokio::spawn(async move {
                cache.del(&shape_id).await;
                shape_id
            }));
        }
        for deletion in deletions {
            if let Ok(shape_id) = deletion.await {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.emit(InsightsEvent::evict(shape_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_is_zero_before_any_request() {
        assert_eq!(StatsSnapshot::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_math() {
        let snapshot = StatsSnapshot {
            total_requests: 10,
            cache_hits: 8,
            cache_misses: 2,
            evictions: 0,
        };
        assert!((snapshot.hit_rate() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_builder() {
        let config = CoordinatorConfig::new()
            .with_default_ttl(Duration::from_secs(120))
            .with_single_flight_timeout(Duration::from_secs(2))
            .with_insights_capacity(16);
        assert_eq!(config.default_ttl, Duration::from_secs(120));
        assert_eq!(config.single_flight_timeout, Duration::from_secs(2));
        assert_eq!(config.insights_capacity, 16);
    }
}
