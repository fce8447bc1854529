//! Facade-level tests: ORM calls routed through the mapper, transaction
//! bracketing, batch execution, and the diagnostics surface.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use ikache_client::{
    CachedClient, CoordinatorConfig, DatabaseExecutor, JsonMapper, OrmCall,
};
use ikache_core::{DbError, IkacheError};
use ikache_storage::{Cache, MemoryCache};
use serde_json::json;
use support::{user_schema, MockEngine, ScriptedDb};

struct Harness {
    engine: Arc<MockEngine>,
    cache: Arc<MemoryCache>,
    db: Arc<ScriptedDb>,
    client: CachedClient<JsonMapper>,
}

async fn harness() -> Harness {
    let engine = Arc::new(MockEngine::new());
    let cache = Arc::new(MemoryCache::with_defaults());
    let db = Arc::new(ScriptedDb::new());
    db.respond("User", "findMany", json!([{"id": "u1", "name": "Ann"}]));
    db.respond("User", "create", json!({"id": "u2", "name": "Bob"}));
    db.respond("User", "update", json!({"id": "u1", "name": "Eve"}));

    let client = CachedClient::connect(
        &user_schema(),
        Arc::clone(&engine) as Arc<dyn ikache_engine::DependencyEngine>,
        Arc::clone(&cache) as Arc<dyn Cache>,
        JsonMapper::new(user_schema()),
        Arc::clone(&db) as Arc<dyn DatabaseExecutor>,
        CoordinatorConfig::default(),
    )
    .await
    .unwrap();

    Harness {
        engine,
        cache,
        db,
        client,
    }
}

fn find_many() -> OrmCall {
    OrmCall::new("User", "findMany", json!({}))
}

#[tokio::test]
async fn test_connect_installs_the_schema() {
    let h = harness().await;
    assert_eq!(h.engine.set_schema_calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_repeated_reads_hit_the_cache() {
    let h = harness().await;

    let first = h.client.execute(find_many()).await.unwrap();
    let second = h.client.execute(find_many()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.db.call_count("User", "findMany"), 1);

    let stats = h.client.coordinator().stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.cache_hits, 1);
}

#[tokio::test]
async fn test_write_through_client_evicts_dependents() {
    let h = harness().await;

    h.client.execute(find_many()).await.unwrap();
    h.client
        .execute(OrmCall::new(
            "User",
            "create",
            json!({"data": {"name": "Bob"}}),
        ))
        .await
        .unwrap();

    // The cached find result was invalidated; the read runs again.
    h.client.execute(find_many()).await.unwrap();
    assert_eq!(h.db.call_count("User", "findMany"), 2);
}

#[tokio::test]
async fn test_interactive_transaction_commits_atomically() {
    let h = harness().await;

    h.client.execute(find_many()).await.unwrap();
    assert_eq!(h.cache.size().await, Some(1));

    let cache = Arc::clone(&h.cache);
    h.client
        .transaction(move |scope| async move {
            scope
                .execute(OrmCall::new(
                    "User",
                    "update",
                    json!({"where": {"id": "u1"}, "data": {"name": "Eve"}}),
                ))
                .await?;
            // Buffered: the dependent read entry is still cached.
            assert_eq!(cache.size().await, Some(1));
            Ok(())
        })
        .await
        .unwrap();

    // Applied on commit.
    assert_eq!(h.cache.size().await, Some(0));
}

#[tokio::test]
async fn test_interactive_transaction_rolls_back_without_evicting() {
    let h = harness().await;

    h.client.execute(find_many()).await.unwrap();

    let result: Result<(), _> = h
        .client
        .transaction(|scope| async move {
            scope
                .execute(OrmCall::new(
                    "User",
                    "update",
                    json!({"where": {"id": "u1"}, "data": {"name": "Eve"}}),
                ))
                .await?;
            Err(IkacheError::Database(DbError::msg("user abort")))
        })
        .await;

    assert!(result.is_err());
    // The write succeeded inside the transaction's DB scope, but the
    // rollback discarded its buffered evictions.
    assert_eq!(h.db.call_count("User", "update"), 1);
    assert_eq!(h.cache.size().await, Some(1));
}

#[tokio::test]
async fn test_batch_writes_evict_immediately() {
    let h = harness().await;

    h.client.execute(find_many()).await.unwrap();
    assert_eq!(h.cache.size().await, Some(1));

    let results = h
        .client
        .batch(vec![OrmCall::new(
            "User",
            "create",
            json!({"data": {"name": "Bob"}}),
        )])
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    // No buffering without a transactional handle.
    assert_eq!(h.cache.size().await, Some(0));
}

#[tokio::test]
async fn test_db_failure_surfaces_and_leaves_cache_intact() {
    let h = harness().await;

    h.client.execute(find_many()).await.unwrap();
    h.db.fail("User", "create");

    let err = h
        .client
        .execute(OrmCall::new(
            "User",
            "create",
            json!({"data": {"name": "Bob"}}),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, IkacheError::Database(_)));
    assert_eq!(h.cache.size().await, Some(1));
}

#[tokio::test]
async fn test_diagnostics_surface() {
    let h = harness().await;
    let diagnostics = h.client.diagnostics();

    let version = diagnostics.version().await.unwrap();
    assert_eq!(version.core, "mock-engine");

    h.client.execute(find_many()).await.unwrap();
    h.client.execute(find_many()).await.unwrap();

    let report = diagnostics.cache_stats().await;
    assert_eq!(report.size, 1);
    assert!((report.hit_rate - 0.5).abs() < f64::EPSILON);

    let explanation = diagnostics
        .explain_invalidation(
            ikache_core::Mutation::new(vec![]),
            ikache_core::ShapeId::from("S1"),
        )
        .await
        .unwrap();
    assert!(explanation.invalidate);

    diagnostics.reset().await.unwrap();
    assert_eq!(h.engine.reset_calls.load(Ordering::Relaxed), 1);
    assert_eq!(h.cache.size().await, Some(0));

    diagnostics.destroy().await;
}
