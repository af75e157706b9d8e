//! The query runtime.
//!
//! Orchestrates the full lifecycle for one `(endpoint, cache key)` pair:
//! synchronous cache-hit short-circuit, fetch dispatch, success/error commit,
//! and re-derivation of output against the live entity table on every read.
//!
//! The engine state lock is only ever held across synchronous sections; the
//! sole suspension points are the fetch itself and waiting on another
//! caller's in-flight completion channel.

use crate::endpoint::EndpointDescriptor;
use crate::key::derive_key;
use crate::slice::{ApiState, CacheAction, PerKeyState};
use crate::{QueryError, QueryResult};
use cadenza_cache::EntityStore;
use cadenza_schema::{normalize, ResponseSchema, SchemaRegistry, SchemaResult};
use cadenza_types::{CacheKey, EntityId, Status, StrippedEntityMap};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Suppresses the fetch decision entirely. Cached state, if any, is
    /// still returned.
    pub disabled: bool,
}

/// What view code consumes. Everything else on the per-key state is
/// engine-internal.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    /// The rehydrated data, narrowed to the endpoint's schema key when one
    /// is declared. `None` until a success (or cache hit) commits.
    pub data: Option<Value>,
    pub status: Status,
    pub error_message: Option<String>,
}

impl QueryResponse {
    fn idle() -> Self {
        Self {
            data: None,
            status: Status::Idle,
            error_message: None,
        }
    }
}

struct EngineState {
    api: ApiState,
    /// One completion channel per in-flight fetch. A caller that loses the
    /// check-and-set awaits the channel instead of fetching again.
    in_flight: HashMap<(String, CacheKey), watch::Sender<bool>>,
}

/// How a call proceeds after the synchronous decision section.
enum Plan {
    /// Answer from current state; no fetch.
    Respond,
    /// Another caller's fetch is in flight; wait for it, then answer.
    Join(watch::Receiver<bool>),
    /// This caller won the check-and-set and fetches.
    Fetch,
}

/// Registers endpoints and collaborators for an [`Engine`].
///
/// Mirrors the one-time registration of the endpoint map: once built, the
/// engine's endpoints are immutable.
pub struct EngineBuilder<C> {
    reducer_path: String,
    store: Arc<EntityStore>,
    registry: Arc<SchemaRegistry>,
    response_schema: ResponseSchema,
    endpoints: HashMap<String, EndpointDescriptor<C>>,
}

impl<C: Send + Sync> EngineBuilder<C> {
    /// Starts a builder for an engine instance.
    ///
    /// `reducer_path` names the engine's state region; an app may host
    /// several independent engines under different paths, all sharing one
    /// [`EntityStore`].
    #[must_use]
    pub fn new(
        reducer_path: impl Into<String>,
        store: Arc<EntityStore>,
        registry: Arc<SchemaRegistry>,
        response_schema: ResponseSchema,
    ) -> Self {
        Self {
            reducer_path: reducer_path.into(),
            store,
            registry,
            response_schema,
            endpoints: HashMap::new(),
        }
    }

    /// Registers an endpoint. The last registration for a name wins.
    #[must_use]
    pub fn endpoint(mut self, descriptor: EndpointDescriptor<C>) -> Self {
        let name = descriptor.name().to_string();
        if self.endpoints.insert(name.clone(), descriptor).is_some() {
            warn!("Endpoint {} registered twice, keeping the last", name);
        }
        self
    }

    /// Finishes registration, binding the externally supplied context.
    #[must_use]
    pub fn build(self, context: C) -> Engine<C> {
        Engine {
            reducer_path: self.reducer_path,
            store: self.store,
            registry: self.registry,
            response_schema: self.response_schema,
            endpoints: self.endpoints,
            state: Mutex::new(EngineState {
                api: ApiState::new(),
                in_flight: HashMap::new(),
            }),
            context,
        }
    }
}

/// One engine instance: a set of endpoints, their per-key request state, and
/// a handle to the shared entity store.
pub struct Engine<C> {
    reducer_path: String,
    endpoints: HashMap<String, EndpointDescriptor<C>>,
    registry: Arc<SchemaRegistry>,
    response_schema: ResponseSchema,
    store: Arc<EntityStore>,
    state: Mutex<EngineState>,
    context: C,
}

impl<C: Send + Sync> Engine<C> {
    /// Resolves a query: answers from cache when possible, fetching
    /// otherwise.
    ///
    /// Fetch-path failures never escape as `Err` — they are committed as
    /// `{status: Error, error_message}` and reported in the response.
    /// `Err` means the call itself was malformed (unknown endpoint).
    pub async fn query(
        &self,
        endpoint: &str,
        args: &Value,
        options: QueryOptions,
    ) -> QueryResult<QueryResponse> {
        let descriptor = self.descriptor(endpoint)?;
        let key = derive_key(args);

        let plan = {
            let mut state = self.state.lock();

            // Single-entity shortcut: a first read whose target entity is
            // already cached synthesizes a Success without fetching, and
            // persists it so later reads take the normal path.
            if state.api.per_key(endpoint, &key).is_none() {
                if let Some((normalized, stripped)) = self.synthesize_cache_hit(descriptor, args) {
                    debug!("Cache hit for {} {} without fetch", endpoint, key);
                    state.api.apply(CacheAction::Succeeded {
                        endpoint: endpoint.to_string(),
                        key: key.clone(),
                        normalized,
                        stripped,
                        is_initial_value: true,
                    });
                }
            }

            let per_key = state.api.per_key(endpoint, &key);
            let status = per_key.map(|s| s.status).unwrap_or_default();
            let has_data = per_key.is_some_and(|s| s.normalized.is_some());

            if options.disabled || has_data {
                Plan::Respond
            } else if status.is_loading() {
                match state.in_flight.get(&(endpoint.to_string(), key.clone())) {
                    Some(sender) => Plan::Join(sender.subscribe()),
                    None => Plan::Respond,
                }
            } else {
                self.begin_fetch(&mut state, endpoint, &key);
                Plan::Fetch
            }
        };

        match plan {
            Plan::Respond => {}
            Plan::Join(mut done) => {
                let _ = done.changed().await;
            }
            Plan::Fetch => self.run_fetch(descriptor, args, &key).await,
        }
        Ok(self.read_key(descriptor, &key))
    }

    /// Re-derives `{data, status, error_message}` from current state without
    /// any fetch decision.
    ///
    /// This is the reactive read: re-run it whenever
    /// [`subscribe_entities`](Self::subscribe_entities) signals a change and
    /// the data reflects the latest entity fields without re-fetching.
    pub fn read(&self, endpoint: &str, args: &Value) -> QueryResult<QueryResponse> {
        let descriptor = self.descriptor(endpoint)?;
        let key = derive_key(args);
        Ok(self.read_key(descriptor, &key))
    }

    /// Runs a mutation endpoint: always fetches, then commits the result
    /// through the same normalize/merge pipeline as a query.
    pub async fn mutate(&self, endpoint: &str, args: &Value) -> QueryResult<QueryResponse> {
        self.force_fetch(endpoint, args).await
    }

    /// Fetches again even though the key may hold a cached success. Joins an
    /// already in-flight fetch for the key instead of doubling it.
    pub async fn refetch(&self, endpoint: &str, args: &Value) -> QueryResult<QueryResponse> {
        self.force_fetch(endpoint, args).await
    }

    /// Applies a recipe to a key's cached skeleton and re-commits it as a
    /// success. Returns whether there was cached data to update.
    pub fn update_query_data(
        &self,
        endpoint: &str,
        args: &Value,
        recipe: impl FnOnce(&mut Value),
    ) -> QueryResult<bool> {
        self.descriptor(endpoint)?;
        let key = derive_key(args);
        let mut state = self.state.lock();
        let Some(per_key) = state.api.per_key(endpoint, &key) else {
            return Ok(false);
        };
        let Some(mut skeleton) = per_key.normalized.clone() else {
            return Ok(false);
        };
        let stripped = per_key.stripped.clone().unwrap_or_default();
        recipe(&mut skeleton);
        state.api.apply(CacheAction::Succeeded {
            endpoint: endpoint.to_string(),
            key,
            normalized: skeleton,
            stripped,
            is_initial_value: false,
        });
        Ok(true)
    }

    /// Drops every cached key of an endpoint. Administrative — the request
    /// lifecycle itself never deletes state.
    pub fn reset_endpoint(&self, endpoint: &str) -> QueryResult<()> {
        self.descriptor(endpoint)?;
        self.state.lock().api.apply(CacheAction::Reset {
            endpoint: endpoint.to_string(),
        });
        Ok(())
    }

    // ── Introspection ────────────────────────────────────────────

    /// The engine's state region name.
    #[must_use]
    pub fn reducer_path(&self) -> &str {
        &self.reducer_path
    }

    /// The per-key state for an argument set, if any. Test surface.
    pub fn per_key_state(&self, endpoint: &str, args: &Value) -> QueryResult<Option<PerKeyState>> {
        self.descriptor(endpoint)?;
        let key = derive_key(args);
        Ok(self.state.lock().api.per_key(endpoint, &key).cloned())
    }

    /// A copy of the whole per-endpoint state. Test surface.
    #[must_use]
    pub fn snapshot(&self) -> ApiState {
        self.state.lock().api.clone()
    }

    /// The shared entity store this engine commits into.
    #[must_use]
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Current version of the shared entity table.
    #[must_use]
    pub fn entity_version(&self) -> u64 {
        self.store.version()
    }

    /// Subscribes to entity table changes; re-run [`read`](Self::read) when
    /// the version moves.
    #[must_use]
    pub fn subscribe_entities(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    /// The externally supplied context handed to every fetch.
    #[must_use]
    pub fn context(&self) -> &C {
        &self.context
    }

    // ── Fetch pipeline ───────────────────────────────────────────

    fn descriptor(&self, endpoint: &str) -> QueryResult<&EndpointDescriptor<C>> {
        self.endpoints
            .get(endpoint)
            .ok_or_else(|| QueryError::UnknownEndpoint(endpoint.to_string()))
    }

    /// Marks the key Loading and opens its completion channel. Must run
    /// under the state lock — this is the atomic check-and-set that makes
    /// same-key callers converge on one fetch.
    fn begin_fetch(&self, state: &mut EngineState, endpoint: &str, key: &CacheKey) {
        let (sender, _) = watch::channel(false);
        state
            .in_flight
            .insert((endpoint.to_string(), key.clone()), sender);
        state.api.apply(CacheAction::Loading {
            endpoint: endpoint.to_string(),
            key: key.clone(),
        });
    }

    async fn force_fetch(&self, endpoint: &str, args: &Value) -> QueryResult<QueryResponse> {
        let descriptor = self.descriptor(endpoint)?;
        let key = derive_key(args);

        let joined = {
            let mut state = self.state.lock();
            match state.in_flight.get(&(endpoint.to_string(), key.clone())) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    self.begin_fetch(&mut state, endpoint, &key);
                    None
                }
            }
        };

        match joined {
            Some(mut done) => {
                let _ = done.changed().await;
            }
            None => self.run_fetch(descriptor, args, &key).await,
        }
        Ok(self.read_key(descriptor, &key))
    }

    async fn run_fetch(&self, descriptor: &EndpointDescriptor<C>, args: &Value, key: &CacheKey) {
        let endpoint = descriptor.name();
        descriptor.fetcher().on_query_started(args);
        debug!("Fetching {} {}", endpoint, key);

        let action = match descriptor.fetcher().fetch(args, &self.context).await {
            Ok(Some(api_data)) => match self.normalize_and_commit(descriptor, &api_data) {
                Ok((normalized, stripped)) => {
                    descriptor.fetcher().on_query_success(args, &normalized);
                    CacheAction::Succeeded {
                        endpoint: endpoint.to_string(),
                        key: key.clone(),
                        normalized,
                        stripped,
                        is_initial_value: false,
                    }
                }
                Err(e) => {
                    warn!("Normalization failed for {} {}: {}", endpoint, key, e);
                    CacheAction::Errored {
                        endpoint: endpoint.to_string(),
                        key: key.clone(),
                        message: e.to_string(),
                    }
                }
            },
            Ok(None) => {
                debug!("No remote data for {} {}", endpoint, key);
                CacheAction::Errored {
                    endpoint: endpoint.to_string(),
                    key: key.clone(),
                    message: QueryError::RemoteDataNotFound.to_string(),
                }
            }
            Err(e) => {
                warn!("Fetch failed for {} {}: {:#}", endpoint, key, e);
                CacheAction::Errored {
                    endpoint: endpoint.to_string(),
                    key: key.clone(),
                    message: e.to_string(),
                }
            }
        };

        let mut state = self.state.lock();
        state.api.apply(action);
        if let Some(sender) = state.in_flight.remove(&(endpoint.to_string(), key.clone())) {
            let _ = sender.send(true);
        }
    }

    /// Normalizes a fetch result (wrapped under the endpoint's schema key
    /// when one is declared) and merges its entities into the shared store.
    fn normalize_and_commit(
        &self,
        descriptor: &EndpointDescriptor<C>,
        api_data: &Value,
    ) -> SchemaResult<(Value, StrippedEntityMap)> {
        let wrapped;
        let raw = match &descriptor.cache_options().schema_key {
            Some(schema_key) => {
                let mut fields = Map::new();
                fields.insert(schema_key.clone(), api_data.clone());
                wrapped = Value::Object(fields);
                &wrapped
            }
            None => api_data,
        };
        let normalized = normalize(raw, &self.registry, &self.response_schema)?;
        let stripped = normalized.entities.strip();
        self.store.commit(normalized.entities);
        Ok((normalized.result, stripped))
    }

    /// Synthesizes a Success state from already-cached entities, without
    /// fetching. Applies only to endpoints declaring cache metadata, and
    /// for id-list endpoints only when every listed id is present.
    fn synthesize_cache_hit(
        &self,
        descriptor: &EndpointDescriptor<C>,
        args: &Value,
    ) -> Option<(Value, StrippedEntityMap)> {
        let opts = descriptor.cache_options();
        let kind = opts.kind.as_ref()?;
        let schema_key = opts.schema_key.as_ref()?;

        let cached = if let Some(arg_key) = &opts.id_arg_key {
            let id = EntityId::from_value(args.get(arg_key.as_str())?)?;
            self.store.get(kind, id)?
        } else if let Some(list_key) = &opts.id_list_arg_key {
            let ids: Vec<EntityId> = args
                .get(list_key.as_str())?
                .as_array()?
                .iter()
                .map(EntityId::from_value)
                .collect::<Option<Vec<_>>>()?;
            if ids.is_empty() || !self.store.contains_all(kind, &ids) {
                return None;
            }
            Value::Array(ids.iter().filter_map(|id| self.store.get(kind, *id)).collect())
        } else {
            return None;
        };

        let mut fields = Map::new();
        fields.insert(schema_key.clone(), cached);
        match normalize(&Value::Object(fields), &self.registry, &self.response_schema) {
            Ok(normalized) => {
                let stripped = normalized.entities.strip();
                Some((normalized.result, stripped))
            }
            Err(e) => {
                debug!("Cache-hit synthesis failed for {}: {}", descriptor.name(), e);
                None
            }
        }
    }

    // ── Read path ────────────────────────────────────────────────

    fn read_key(&self, descriptor: &EndpointDescriptor<C>, key: &CacheKey) -> QueryResponse {
        let state = self.state.lock();
        match state.api.per_key(descriptor.name(), key) {
            Some(per_key) => self.derive_response(descriptor, per_key),
            None => QueryResponse::idle(),
        }
    }

    /// Rehydrates the cached skeleton against the live entity table —
    /// always recomputed, never cached, so consumers see the latest entity
    /// values even when a different endpoint wrote them.
    fn derive_response(
        &self,
        descriptor: &EndpointDescriptor<C>,
        per_key: &PerKeyState,
    ) -> QueryResponse {
        let data = per_key
            .normalized
            .as_ref()
            .and_then(|skeleton| {
                let stripped = per_key.stripped.clone().unwrap_or_default();
                match self.store.rehydrate(
                    skeleton,
                    &stripped,
                    &self.registry,
                    &self.response_schema,
                ) {
                    Ok(denorm) => {
                        if !denorm.is_complete() {
                            debug!(
                                "{} entities missing while rehydrating {}",
                                denorm.missing.len(),
                                descriptor.name()
                            );
                        }
                        match &descriptor.cache_options().schema_key {
                            Some(schema_key) => denorm.data.get(schema_key.as_str()).cloned(),
                            None => Some(denorm.data),
                        }
                    }
                    Err(e) => {
                        warn!("Rehydration failed for {}: {}", descriptor.name(), e);
                        None
                    }
                }
            })
            .filter(|data| !data.is_null());

        QueryResponse {
            data,
            status: per_key.status,
            error_message: per_key.error_message.clone(),
        }
    }
}
