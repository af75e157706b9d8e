use async_trait::async_trait;
use cadenza_cache::EntityStore;
use cadenza_query::{
    EndpointDescriptor, EndpointOptions, Engine, EngineBuilder, Fetcher, QueryError, QueryOptions,
};
use cadenza_schema::{EntityDescriptor, ResponseSchema, SchemaRegistry};
use cadenza_types::{EntityId, EntityKind, EntityTable, Status};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Stub fetchers ────────────────────────────────────────────────

/// Returns a canned payload, counting calls. A nonzero delay suspends at
/// the fetch boundary so callers can overlap.
struct CannedFetcher {
    calls: AtomicUsize,
    payload: Value,
    delay_ms: u64,
}

impl CannedFetcher {
    fn new(payload: Value) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            payload,
            delay_ms: 0,
        })
    }

    fn slow(payload: Value, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            payload,
            delay_ms,
        })
    }

    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C: Send + Sync> Fetcher<C> for CannedFetcher {
    async fn fetch(&self, _args: &Value, _context: &C) -> anyhow::Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(Some(self.payload.clone()))
    }
}

/// Builds a user payload from the requested id.
struct EchoUserFetcher {
    calls: AtomicUsize,
}

impl EchoUserFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C: Send + Sync> Fetcher<C> for EchoUserFetcher {
    async fn fetch(&self, args: &Value, _context: &C) -> anyhow::Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = args["id"].as_i64().unwrap_or(0);
        Ok(Some(
            json!({"id": id, "name": format!("user-{id}"), "followers": []}),
        ))
    }
}

/// Always fails at the transport level.
struct FailingFetcher {
    calls: AtomicUsize,
}

impl FailingFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C: Send + Sync> Fetcher<C> for FailingFetcher {
    async fn fetch(&self, _args: &Value, _context: &C) -> anyhow::Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("connection reset"))
    }
}

/// Resolves without a payload.
struct NotFoundFetcher;

#[async_trait]
impl<C: Send + Sync> Fetcher<C> for NotFoundFetcher {
    async fn fetch(&self, _args: &Value, _context: &C) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }
}

/// Succeeds once, then fails.
struct FlakyFetcher {
    calls: AtomicUsize,
    payload: Value,
}

impl FlakyFetcher {
    fn new(payload: Value) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            payload,
        })
    }
}

#[async_trait]
impl<C: Send + Sync> Fetcher<C> for FlakyFetcher {
    async fn fetch(&self, _args: &Value, _context: &C) -> anyhow::Result<Option<Value>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Some(self.payload.clone()))
        } else {
            Err(anyhow::anyhow!("connection reset"))
        }
    }
}

/// Counts lifecycle hook invocations.
struct HookFetcher {
    started: AtomicUsize,
    succeeded: AtomicUsize,
}

impl HookFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl<C: Send + Sync> Fetcher<C> for HookFetcher {
    async fn fetch(&self, args: &Value, _context: &C) -> anyhow::Result<Option<Value>> {
        let id = args["id"].as_i64().unwrap_or(0);
        Ok(Some(json!({"id": id, "name": "hooked", "followers": []})))
    }

    fn on_query_started(&self, _args: &Value) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_query_success(&self, _args: &Value, _normalized: &Value) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Harness ──────────────────────────────────────────────────────

/// Opt-in engine logging for debugging: `RUST_LOG=cadenza_query=debug`.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn registry() -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::new()
            .register(EntityDescriptor::new("user").many("followers", "user"))
            .register(EntityDescriptor::new("track").one("owner", "user")),
    )
}

fn response_schema() -> ResponseSchema {
    ResponseSchema::new()
        .one("user", "user")
        .many("users", "user")
        .one("track", "track")
        .many("tracks", "track")
}

fn user_endpoint(fetcher: Arc<dyn Fetcher<()>>) -> EndpointDescriptor<()> {
    EndpointDescriptor::new("getUser", fetcher)
        .options(EndpointOptions::cached_by_id("user", "id", "user"))
}

fn engine(endpoints: Vec<EndpointDescriptor<()>>) -> Engine<()> {
    let mut builder = EngineBuilder::new(
        "user_api",
        Arc::new(EntityStore::new()),
        registry(),
        response_schema(),
    );
    for descriptor in endpoints {
        builder = builder.endpoint(descriptor);
    }
    builder.build(())
}

fn user_kind() -> EntityKind {
    EntityKind::new("user")
}

fn alice() -> Value {
    json!({
        "id": 5,
        "name": "Alice",
        "followers": [
            {"id": 6, "name": "Bob", "followers": []},
            {"id": 7, "name": "Carol", "followers": []}
        ]
    })
}

// ── Query lifecycle ──────────────────────────────────────────────

#[tokio::test]
async fn fetch_normalizes_commits_and_returns_data() {
    init_tracing();
    let fetcher = CannedFetcher::new(alice());
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    let response = engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status, Status::Success);
    assert_eq!(response.error_message, None);
    let data = response.data.unwrap();
    assert_eq!(data["name"], json!("Alice"));
    assert_eq!(data["followers"][0]["name"], json!("Bob"));
    assert_eq!(fetcher.count(), 1);

    // Every nested entity landed in the shared store.
    for id in [5, 6, 7] {
        assert!(engine.store().contains(&user_kind(), EntityId::new(id)));
    }

    // The per-key state keeps the skeleton and the id map, not payloads.
    let state = engine
        .per_key_state("getUser", &json!({"id": 5}))
        .unwrap()
        .unwrap();
    assert_eq!(state.normalized, Some(json!({"user": 5})));
    assert!(!state.is_initial_value);
}

#[tokio::test]
async fn second_call_answers_from_cache() {
    let fetcher = CannedFetcher::new(alice());
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    let first = engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();
    let second = engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(fetcher.count(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn distinct_args_fetch_under_distinct_keys() {
    let fetcher = EchoUserFetcher::new();
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    let a = engine
        .query("getUser", &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap();
    let b = engine
        .query("getUser", &json!({"id": 2}), QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(fetcher.count(), 2);
    assert_eq!(a.data.unwrap()["name"], json!("user-1"));
    assert_eq!(b.data.unwrap()["name"], json!("user-2"));
}

#[tokio::test]
async fn overlapping_same_key_callers_share_one_fetch() {
    init_tracing();
    let fetcher = CannedFetcher::slow(alice(), 20);
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    let args = json!({"id": 5});
    let (a, b) = tokio::join!(
        engine.query("getUser", &args, QueryOptions::default()),
        engine.query("getUser", &args, QueryOptions::default()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(fetcher.count(), 1);
    assert_eq!(a.status, Status::Success);
    assert_eq!(a, b);

    let state = engine
        .per_key_state("getUser", &json!({"id": 5}))
        .unwrap()
        .unwrap();
    assert_eq!(state.status, Status::Success);
}

#[tokio::test]
async fn disabled_never_fetches() {
    let fetcher = CannedFetcher::new(alice());
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    let response = engine
        .query("getUser", &json!({"id": 5}), QueryOptions { disabled: true })
        .await
        .unwrap();

    assert_eq!(fetcher.count(), 0);
    assert_eq!(response.status, Status::Idle);
    assert_eq!(response.data, None);
}

#[tokio::test]
async fn unknown_endpoint_fails_fast() {
    let engine = engine(vec![]);
    let err = engine
        .query("nope", &json!({}), QueryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, QueryError::UnknownEndpoint("nope".to_string()));
}

// ── Cache-hit shortcut ───────────────────────────────────────────

#[tokio::test]
async fn cached_entity_short_circuits_first_read() {
    let fetcher = CannedFetcher::new(alice());
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    let mut table = EntityTable::new();
    table.insert(
        user_kind(),
        EntityId::new(42),
        json!({"id": 42, "name": "Zoe", "followers": []}),
    );
    engine.store().commit(table);

    let response = engine
        .query("getUser", &json!({"id": 42}), QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(fetcher.count(), 0);
    assert_eq!(response.status, Status::Success);
    assert_eq!(response.data.unwrap()["name"], json!("Zoe"));

    // The synthesized state was persisted, flagged as an initial value.
    let state = engine
        .per_key_state("getUser", &json!({"id": 42}))
        .unwrap()
        .unwrap();
    assert!(state.is_initial_value);
    assert_eq!(state.normalized, Some(json!({"user": 42})));

    // Later reads take the normal path and still do not fetch.
    engine
        .query("getUser", &json!({"id": 42}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(fetcher.count(), 0);
}

#[tokio::test]
async fn id_list_shortcut_requires_every_entity() {
    let fetcher = CannedFetcher::new(json!([
        {"id": 1, "name": "user-1", "followers": []},
        {"id": 3, "name": "user-3", "followers": []}
    ]));
    let list_fetcher: Arc<dyn Fetcher<()>> = fetcher.clone();
    let engine = engine(vec![EndpointDescriptor::new("getUsers", list_fetcher)
        .options(EndpointOptions::cached_by_id_list("user", "ids", "users"))]);

    let mut table = EntityTable::new();
    table.insert(user_kind(), EntityId::new(1), json!({"id": 1, "name": "user-1", "followers": []}));
    table.insert(user_kind(), EntityId::new(2), json!({"id": 2, "name": "user-2", "followers": []}));
    engine.store().commit(table);

    // Both ids cached: no fetch.
    let hit = engine
        .query("getUsers", &json!({"ids": [1, 2]}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(fetcher.count(), 0);
    assert_eq!(hit.status, Status::Success);
    assert_eq!(hit.data.unwrap().as_array().unwrap().len(), 2);

    // One id absent: the whole list is fetched.
    let miss = engine
        .query("getUsers", &json!({"ids": [1, 3]}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(fetcher.count(), 1);
    assert_eq!(miss.status, Status::Success);
    assert!(engine.store().contains(&user_kind(), EntityId::new(3)));
}

// ── Error handling ───────────────────────────────────────────────

#[tokio::test]
async fn fetch_errors_are_stored_not_thrown() {
    let fetcher = FailingFetcher::new();
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    let response = engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status, Status::Error);
    assert_eq!(response.data, None);
    assert!(response.error_message.unwrap().contains("connection reset"));

    // With nothing cached, a later call for the same key tries again.
    engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(fetcher.count(), 2);
}

#[tokio::test]
async fn empty_fetch_result_is_remote_data_not_found() {
    let engine = engine(vec![user_endpoint(Arc::new(NotFoundFetcher))]);

    let response = engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status, Status::Error);
    assert_eq!(
        response.error_message,
        Some("remote data not found".to_string())
    );
}

#[tokio::test]
async fn error_after_success_keeps_stale_data() {
    let fetcher = FlakyFetcher::new(alice());
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    let first = engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(first.status, Status::Success);

    let second = engine.refetch("getUser", &json!({"id": 5})).await.unwrap();
    assert_eq!(second.status, Status::Error);
    assert!(second.error_message.unwrap().contains("connection reset"));
    // Last-known-good data survives the failure.
    assert_eq!(second.data.unwrap()["name"], json!("Alice"));

    let state = engine
        .per_key_state("getUser", &json!({"id": 5}))
        .unwrap()
        .unwrap();
    assert_eq!(state.normalized, Some(json!({"user": 5})));
}

// ── Reactivity ───────────────────────────────────────────────────

#[tokio::test]
async fn entity_updates_from_other_endpoints_are_visible() {
    let track_fetcher = CannedFetcher::new(json!({
        "id": 7,
        "title": "Song",
        "owner": {"id": 5, "name": "Alice", "followers": []}
    }));
    let user_fetcher = CannedFetcher::new(json!({
        "id": 5,
        "name": "Alice (verified)",
        "followers": []
    }));
    let fetcher: Arc<dyn Fetcher<()>> = track_fetcher.clone();
    let engine = engine(vec![
        EndpointDescriptor::new("getTrack", fetcher)
            .options(EndpointOptions::cached_by_id("track", "id", "track")),
        user_endpoint(user_fetcher.clone()),
    ]);

    let first = engine
        .query("getTrack", &json!({"id": 7}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(first.data.unwrap()["owner"]["name"], json!("Alice"));

    let version_before = engine.entity_version();
    let mut watcher = engine.subscribe_entities();

    // A different endpoint's success rewrites user 5.
    engine.refetch("getUser", &json!({"id": 5})).await.unwrap();
    assert!(engine.entity_version() > version_before);
    watcher.changed().await.unwrap();

    // The track read reflects the new owner fields without re-fetching.
    let second = engine.read("getTrack", &json!({"id": 7})).unwrap();
    assert_eq!(
        second.data.unwrap()["owner"]["name"],
        json!("Alice (verified)")
    );
    assert_eq!(track_fetcher.count(), 1);
}

#[tokio::test]
async fn direct_store_commits_are_visible_too() {
    let fetcher = CannedFetcher::new(alice());
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();

    // Some non-endpoint path (e.g. a local mutation) merges a field.
    let mut table = EntityTable::new();
    table.insert(user_kind(), EntityId::new(5), json!({"name": "Alicia"}));
    engine.store().commit(table);

    let read = engine.read("getUser", &json!({"id": 5})).unwrap();
    let data = read.data.unwrap();
    assert_eq!(data["name"], json!("Alicia"));
    // Merged, not replaced: untouched fields survive.
    assert_eq!(data["followers"][0]["name"], json!("Bob"));
    assert_eq!(fetcher.count(), 1);
}

#[tokio::test]
async fn skeleton_references_to_absent_entities_yield_null() {
    let fetcher = CannedFetcher::new(alice());
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();

    // Point the skeleton at an entity nothing ever committed.
    let updated = engine
        .update_query_data("getUser", &json!({"id": 5}), |skeleton| {
            skeleton["user"] = json!(999);
        })
        .unwrap();
    assert!(updated);

    let read = engine.read("getUser", &json!({"id": 5})).unwrap();
    assert_eq!(read.status, Status::Success);
    assert_eq!(read.data, None);
}

// ── Forced fetches and utilities ─────────────────────────────────

#[tokio::test]
async fn mutate_always_fetches() {
    let fetcher = EchoUserFetcher::new();
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(fetcher.count(), 1);

    let response = engine.mutate("getUser", &json!({"id": 5})).await.unwrap();
    assert_eq!(fetcher.count(), 2);
    assert_eq!(response.status, Status::Success);
}

#[tokio::test]
async fn refetch_joins_an_in_flight_fetch() {
    let fetcher = CannedFetcher::slow(alice(), 20);
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    let args = json!({"id": 5});
    let (a, b) = tokio::join!(
        engine.query("getUser", &args, QueryOptions::default()),
        engine.refetch("getUser", &args),
    );

    assert_eq!(fetcher.count(), 1);
    assert_eq!(a.unwrap().status, Status::Success);
    assert_eq!(b.unwrap().status, Status::Success);
}

#[tokio::test]
async fn update_query_data_rewrites_cached_skeleton() {
    let fetcher: Arc<dyn Fetcher<()>> = CannedFetcher::new(json!({
        "tracks": [{"id": 1, "title": "a", "owner": {"id": 5, "name": "A", "followers": []}}],
        "cursor": "p1"
    }));
    let engine = engine(vec![EndpointDescriptor::new("getFeed", fetcher)]);

    engine
        .query("getFeed", &json!({}), QueryOptions::default())
        .await
        .unwrap();

    let updated = engine
        .update_query_data("getFeed", &json!({}), |skeleton| {
            skeleton["cursor"] = json!("p2");
        })
        .unwrap();
    assert!(updated);

    let read = engine.read("getFeed", &json!({})).unwrap();
    let data = read.data.unwrap();
    assert_eq!(data["cursor"], json!("p2"));
    assert_eq!(data["tracks"][0]["title"], json!("a"));

    // No cached state, nothing to update.
    let missed = engine
        .update_query_data("getFeed", &json!({"page": 2}), |_| {})
        .unwrap();
    assert!(!missed);
}

#[tokio::test]
async fn reset_endpoint_drops_cached_keys() {
    let fetcher = EchoUserFetcher::new();
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(fetcher.count(), 1);

    engine.reset_endpoint("getUser").unwrap();
    assert_eq!(
        engine.per_key_state("getUser", &json!({"id": 5})).unwrap(),
        None
    );
    // Entities stay in the shared store; only request state was dropped.
    assert!(engine.store().contains(&user_kind(), EntityId::new(5)));

    engine
        .query("getUser", &json!({"id": 5}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(fetcher.count(), 2);
}

#[tokio::test]
async fn lifecycle_hooks_fire_on_fetch_only() {
    let fetcher = HookFetcher::new();
    let engine = engine(vec![user_endpoint(fetcher.clone())]);

    engine
        .query("getUser", &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(fetcher.started.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.succeeded.load(Ordering::SeqCst), 1);

    // The key now holds cached data: no fetch, no hooks.
    engine
        .query("getUser", &json!({"id": 1}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(fetcher.started.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.succeeded.load(Ordering::SeqCst), 1);
}

// ── Context injection ────────────────────────────────────────────

struct Backend {
    greeting: String,
}

struct ContextFetcher;

#[async_trait]
impl Fetcher<Backend> for ContextFetcher {
    async fn fetch(&self, args: &Value, context: &Backend) -> anyhow::Result<Option<Value>> {
        let id = args["id"].as_i64().unwrap_or(0);
        Ok(Some(
            json!({"id": id, "name": context.greeting.clone(), "followers": []}),
        ))
    }
}

#[tokio::test]
async fn fetchers_receive_the_injected_context() {
    let engine = EngineBuilder::new(
        "user_api",
        Arc::new(EntityStore::new()),
        registry(),
        response_schema(),
    )
    .endpoint(
        EndpointDescriptor::new("getUser", Arc::new(ContextFetcher))
            .options(EndpointOptions::cached_by_id("user", "id", "user")),
    )
    .build(Backend {
        greeting: "bonjour".to_string(),
    });

    let response = engine
        .query("getUser", &json!({"id": 9}), QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(response.data.unwrap()["name"], json!("bonjour"));
    assert_eq!(engine.context().greeting, "bonjour");
}
