//! IKACHE Client - Cache Coordinator and Integration Facade
//!
//! The orchestration layer of the ikache query-result cache. The
//! [`QueryCoordinator`] owns the system's invariants: at most one
//! in-flight execution per shape id, zero evictions from failed writes,
//! atomic eviction on commit, no eviction leakage on rollback. The
//! [`CachedClient`] facade wires the coordinator, an [`OrmMapper`], and a
//! [`DatabaseExecutor`] into a transparent cached ORM surface.

mod coordinator;
mod diagnostics;
mod facade;
mod flight;
mod mapper;
mod txbuffer;

pub use coordinator::{CoordinatorConfig, QueryCoordinator, StatsSnapshot};
pub use diagnostics::{CacheStatsReport, Diagnostics};
pub use facade::{CachedClient, DatabaseExecutor, TransactionScope};
pub use mapper::{JsonMapper, OperationKind, OrmCall, OrmMapper};
pub use txbuffer::TransactionContext;
