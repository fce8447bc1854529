//! Integration facade
//!
//! Wires the coordinator into a host ORM surface. Every call routes
//! through the mapper to the coordinator; the transaction entry point is
//! replaced with an implementation that brackets the user callback with
//! begin/commit/rollback of the eviction buffer. Batch execution has no
//! per-operation transactional handle, so its writes evict immediately.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use ikache_core::{AppSchema, DbError, IkacheError, IkacheResult, InsightsEvent};
use ikache_engine::DependencyEngine;
use ikache_storage::Cache;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::coordinator::{CoordinatorConfig, QueryCoordinator};
use crate::diagnostics::Diagnostics;
use crate::mapper::{OperationKind, OrmCall, OrmMapper};
use crate::txbuffer::TransactionContext;

/// The real database surface behind the cache.
///
/// Implementations run calls against the host ORM or driver. The
/// transaction hooks let the host open and settle its own database
/// transaction alongside the coordinator's eviction buffer; the defaults
/// are for hosts that manage transactions elsewhere.
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// Run one call, optionally inside the given transaction scope.
    async fn run(&self, call: &OrmCall, tx: Option<&TransactionContext>)
        -> Result<Value, DbError>;

    async fn begin(&self, _tx: &TransactionContext) -> Result<(), DbError> {
        Ok(())
    }

    async fn commit(&self, _tx: &TransactionContext) -> Result<(), DbError> {
        Ok(())
    }

    async fn rollback(&self, _tx: &TransactionContext) -> Result<(), DbError> {
        Ok(())
    }
}

/// Cached client over a host ORM.
///
/// Reads check the cache first; writes invalidate through the engine.
/// The wrapper is transparent: callers keep issuing plain calls and the
/// caching layer does its work underneath.
pub struct CachedClient<M: OrmMapper> {
    coordinator: QueryCoordinator,
    mapper: Arc<M>,
    executor: Arc<dyn DatabaseExecutor>,
}

impl<M: OrmMapper> Clone for CachedClient<M> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            mapper: Arc::clone(&self.mapper),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<M: OrmMapper> CachedClient<M> {
    /// Validate the schema, install it into the engine, and wire the
    /// coordinator. Schema failures are fatal here, before any call runs.
    pub async fn connect(
        schema: &AppSchema,
        engine: Arc<dyn DependencyEngine>,
        cache: Arc<dyn Cache>,
        mapper: M,
        executor: Arc<dyn DatabaseExecutor>,
        config: CoordinatorConfig,
    ) -> IkacheResult<Self> {
        schema.validate()?;
        engine.set_schema(schema).await?;
        Ok(Self {
            coordinator: QueryCoordinator::new(engine, cache, config),
            mapper: Arc::new(mapper),
            executor,
        })
    }

    /// Route one call through the cache.
    pub async fn execute(&self, call: OrmCall) -> IkacheResult<Value> {
        self.execute_in(call, None).await
    }

    /// Run a callback-style interactive transaction.
    ///
    /// Writes issued through the scope buffer their evictions. On a
    /// successful return the database commit settles first, then the
    /// buffered evictions apply atomically; on error nothing evicts.
    pub async fn transaction<F, Fut, T>(&self, callback: F) -> IkacheResult<T>
    where
        F: FnOnce(TransactionScope<M>) -> Fut,
        Fut: Future<Output = IkacheResult<T>>,
    {
        let tx = TransactionContext::new();
        self.executor
            .begin(&tx)
            .await
            .map_err(IkacheError::Database)?;
        self.coordinator.begin(&tx);

        let scope = TransactionScope {
            client: self.clone(),
            tx: Arc::clone(&tx),
        };
        match callback(scope).await {
            Ok(value) => {
                if let Err(db_error) = self.executor.commit(&tx).await {
                    // The database never committed: the buffer must not
                    // apply.
                    self.coordinator.rollback(&tx);
                    return Err(IkacheError::Database(db_error));
                }
                self.coordinator.commit(&tx).await;
                Ok(value)
            }
            Err(error) => {
                if let Err(db_error) = self.executor.rollback(&tx).await {
                    tracing::warn!(error = %db_error, "Database rollback failed");
                }
                self.coordinator.rollback(&tx);
                Err(error)
            }
        }
    }

    /// Run an ordered batch of precomputed operations. No per-operation
    /// transactional handle exists, so writes evict immediately.
    pub async fn batch(&self, calls: Vec<OrmCall>) -> IkacheResult<Vec<Value>> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call).await?);
        }
        Ok(results)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(self.coordinator.clone())
    }

    pub fn coordinator(&self) -> &QueryCoordinator {
        &self.coordinator
    }

    pub fn subscribe_insights(&self) -> broadcast::Receiver<InsightsEvent> {
        self.coordinator.subscribe_insights()
    }

    async fn execute_in(
        &self,
        call: OrmCall,
        tx: Option<&Arc<TransactionContext>>,
    ) -> IkacheResult<Value> {
        match self.mapper.operation_kind(&call) {
            OperationKind::Read => {
                let statement = self.mapper.build_statement(&call)?;
                let executor = Arc::clone(&self.executor);
                let tx_handle = tx.cloned();
                self.coordinator
                    .execute_read(
                        statement,
                        move || async move { executor.run(&call, tx_handle.as_deref()).await },
                        None,
                    )
                    .await
            }
            OperationKind::Write => {
                let mutation = self.mapper.build_mutation(&call)?;
                let executor = Arc::clone(&self.executor);
                let tx_handle = tx.cloned();
                self.coordinator
                    .execute_write(
                        mutation,
                        move || async move { executor.run(&call, tx_handle.as_deref()).await },
                        tx.map(Arc::as_ref),
                    )
                    .await
            }
        }
    }
}

/// Per-transaction view of the client.
///
/// Calls routed through the scope run against the transaction's database
/// connection and buffer their evictions until the transaction settles.
pub struct TransactionScope<M: OrmMapper> {
    client: CachedClient<M>,
    tx: Arc<TransactionContext>,
}

impl<M: OrmMapper> TransactionScope<M> {
    pub async fn execute(&self, call: OrmCall) -> IkacheResult<Value> {
        self.client.execute_in(call, Some(&self.tx)).await
    }

    pub fn context(&self) -> &Arc<TransactionContext> {
        &self.tx
    }
}
