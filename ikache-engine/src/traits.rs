//! Dependency engine contract
//!
//! The coordinator consumes the engine exclusively through
//! [`DependencyEngine`]; the engine owns all dependency edges, and the
//! coordinator holds nothing but opaque shape ids.

use std::collections::HashSet;

use async_trait::async_trait;
use ikache_core::{AppSchema, DependenciesSummary, IkacheResult, Mutation, ShapeId, Statement};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version strings reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineVersion {
    pub core: String,
    pub contract: String,
    pub abi: String,
}

/// Wire response of `compute_shape_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedShapeId {
    pub shape_id: ShapeId,
}

/// Payload of `add_query`: the statement plus an optional result-shape
/// hint the engine uses to extract record-level dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRegistration {
    pub shape: Statement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_hint: Option<Value>,
}

/// One dependency edge the engine registered for a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDependency {
    pub model: String,
    #[serde(default)]
    pub record_ids: Vec<String>,
}

/// Wire response of `add_query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredQuery {
    pub shape_id: ShapeId,
    #[serde(default)]
    pub dependencies: Vec<QueryDependency>,
}

impl RegisteredQuery {
    /// Aggregate the dependency list for insights emission.
    pub fn dependencies_summary(&self) -> DependenciesSummary {
        let models: HashSet<&str> = self
            .dependencies
            .iter()
            .map(|d| d.model.as_str())
            .collect();
        let record_count = self
            .dependencies
            .iter()
            .map(|d| d.record_ids.len())
            .sum::<usize>();
        DependenciesSummary {
            model_count: models.len() as u32,
            record_count: record_count as u32,
        }
    }
}

/// Wire response of `invalidate`: shape ids a successful mutation evicts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvalidationSet {
    #[serde(default)]
    pub evict: Vec<ShapeId>,
}

/// Payload of `explain_invalidation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainRequest {
    pub mutation: Mutation,
    pub shape_id: ShapeId,
}

/// Wire response of `explain_invalidation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationExplanation {
    pub invalidate: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// The dependency engine's function-level contract.
///
/// `set_schema` must succeed before any query or mutation call. All calls
/// are serialized by implementations; the engine is logically
/// single-writer.
#[async_trait]
pub trait DependencyEngine: Send + Sync {
    async fn version(&self) -> IkacheResult<EngineVersion>;

    /// Install the application schema. Required before any other call
    /// except `version`.
    async fn set_schema(&self, schema: &AppSchema) -> IkacheResult<()>;

    /// Compute the deterministic shape id of a statement.
    async fn compute_shape_id(&self, statement: &Statement) -> IkacheResult<ShapeId>;

    /// Register a statement (plus optional result hint) as a tracked
    /// query and return its dependencies.
    async fn add_query(&self, registration: &QueryRegistration) -> IkacheResult<RegisteredQuery>;

    /// Compute the set of tracked shapes a mutation would invalidate.
    async fn invalidate(&self, mutation: &Mutation) -> IkacheResult<InvalidationSet>;

    /// Diagnostics: would this mutation invalidate this shape, and why.
    async fn explain_invalidation(
        &self,
        request: &ExplainRequest,
    ) -> IkacheResult<InvalidationExplanation>;

    /// Drop all tracked queries. The installed schema is retained.
    async fn reset(&self) -> IkacheResult<()>;
}
