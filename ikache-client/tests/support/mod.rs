//! Shared mock collaborators for integration tests.
#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ikache_client::{DatabaseExecutor, OrmCall, TransactionContext};
use ikache_core::{
    AppSchema, DbError, IdDescriptor, IkacheResult, ModelSchema, Mutation, ShapeId, Statement,
};
use ikache_engine::{
    DependencyEngine, EngineVersion, ExplainRequest, InvalidationExplanation, InvalidationSet,
    QueryDependency, QueryRegistration, RegisteredQuery,
};
use serde_json::Value;

pub fn user_schema() -> AppSchema {
    AppSchema {
        version: 1,
        models: vec![
            ModelSchema::new("User", IdDescriptor::String),
            ModelSchema::new("Post", IdDescriptor::String),
        ],
    }
}

/// Scripted dependency engine.
///
/// Shape ids derive deterministically from statement content. Invalidation
/// consumes a scripted queue first; with no script it evicts every
/// registered shape whose model a change touches.
#[derive(Default)]
pub struct MockEngine {
    registered: Mutex<HashMap<String, String>>,
    scripted_evictions: Mutex<VecDeque<Vec<ShapeId>>>,
    pub set_schema_calls: AtomicU64,
    pub add_query_calls: AtomicU64,
    pub invalidate_calls: AtomicU64,
    pub reset_calls: AtomicU64,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_eviction(&self, evict: &[&str]) {
        self.scripted_evictions
            .lock()
            .unwrap()
            .push_back(evict.iter().map(|id| ShapeId::from(*id)).collect());
    }

    pub fn shape_of(statement: &Statement) -> ShapeId {
        let encoded = serde_json::to_string(statement).expect("statement serializes");
        let mut hasher = DefaultHasher::new();
        encoded.hash(&mut hasher);
        ShapeId::from(format!("SID_{}_{:016x}", statement.model, hasher.finish()))
    }
}

#[async_trait]
impl DependencyEngine for MockEngine {
    async fn version(&self) -> IkacheResult<EngineVersion> {
        Ok(EngineVersion {
            core: "mock-engine".to_string(),
            contract: "1".to_string(),
            abi: "1".to_string(),
        })
    }

    async fn set_schema(&self, _schema: &AppSchema) -> IkacheResult<()> {
        self.set_schema_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn compute_shape_id(&self, statement: &Statement) -> IkacheResult<ShapeId> {
        Ok(Self::shape_of(statement))
    }

    async fn add_query(&self, registration: &QueryRegistration) -> IkacheResult<RegisteredQuery> {
        self.add_query_calls.fetch_add(1, Ordering::Relaxed);
        let shape_id = Self::shape_of(&registration.shape);
        self.registered.lock().unwrap().insert(
            shape_id.as_str().to_string(),
            registration.shape.model.clone(),
        );
        let record_count = registration
            .result_hint
            .as_ref()
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        let record_ids = (0..record_count).map(|i| format!("r{i}")).collect();
        Ok(RegisteredQuery {
            shape_id,
            dependencies: vec![QueryDependency {
                model: registration.shape.model.clone(),
                record_ids,
            }],
        })
    }

    async fn invalidate(&self, mutation: &Mutation) -> IkacheResult<InvalidationSet> {
        self.invalidate_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(evict) = self.scripted_evictions.lock().unwrap().pop_front() {
            return Ok(InvalidationSet { evict });
        }
        let models: Vec<&str> = mutation.changes.iter().map(|change| change.model()).collect();
        let registered = self.registered.lock().unwrap();
        let evict = registered
            .iter()
            .filter(|(_, model)| models.contains(&model.as_str()))
            .map(|(shape_id, _)| ShapeId::from(shape_id.as_str()))
            .collect();
        Ok(InvalidationSet { evict })
    }

    async fn explain_invalidation(
        &self,
        _request: &ExplainRequest,
    ) -> IkacheResult<InvalidationExplanation> {
        Ok(InvalidationExplanation {
            invalidate: true,
            reasons: vec!["model overlap".to_string()],
        })
    }

    async fn reset(&self) -> IkacheResult<()> {
        self.reset_calls.fetch_add(1, Ordering::Relaxed);
        self.registered.lock().unwrap().clear();
        Ok(())
    }
}

/// Scripted database executor keyed by `model.operation`.
#[derive(Default)]
pub struct ScriptedDb {
    responses: Mutex<HashMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, model: &str, operation: &str, value: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(format!("{model}.{operation}"), value);
    }

    pub fn fail(&self, model: &str, operation: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(format!("{model}.{operation}"));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, model: &str, operation: &str) -> usize {
        let key = format!("{model}.{operation}");
        self.calls.lock().unwrap().iter().filter(|c| **c == key).count()
    }
}

#[async_trait]
impl DatabaseExecutor for ScriptedDb {
    async fn run(
        &self,
        call: &OrmCall,
        _tx: Option<&TransactionContext>,
    ) -> Result<Value, DbError> {
        let key = format!("{}.{}", call.model, call.operation);
        self.calls.lock().unwrap().push(key.clone());
        if self.failing.lock().unwrap().contains(&key) {
            return Err(DbError::msg(format!("scripted failure for {key}")));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or(Value::Null))
    }
}
