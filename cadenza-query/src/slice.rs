//! Per-endpoint request state.
//!
//! Holds, per `(endpoint, cache key)`, the request lifecycle plus the last
//! normalized result and the trimmed id map it depends on. Transitions are
//! expressed as a typed [`CacheAction`] processed by one reducer — no
//! generated action names.

use cadenza_types::{CacheKey, Status, StrippedEntityMap};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// State of one cache key.
///
/// Exposed for introspection and tests; view code should depend only on the
/// [`QueryResponse`](crate::QueryResponse) contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerKeyState {
    pub status: Status,
    /// The last committed normalized skeleton.
    pub normalized: Option<Value>,
    /// The entities the skeleton depends on, by id.
    pub stripped: Option<StrippedEntityMap>,
    pub error_message: Option<String>,
    /// Whether the state was synthesized from an already-cached entity
    /// rather than a fetch.
    pub is_initial_value: bool,
}

/// A lifecycle transition, addressed by endpoint and cache key.
#[derive(Debug, Clone)]
pub enum CacheAction {
    /// A fetch was dispatched. Preserves previously cached data.
    Loading { endpoint: String, key: CacheKey },
    /// A fetch (or cache-hit synthesis) committed a normalized result.
    Succeeded {
        endpoint: String,
        key: CacheKey,
        normalized: Value,
        stripped: StrippedEntityMap,
        is_initial_value: bool,
    },
    /// A fetch failed. Previously cached data survives (stale-while-error).
    Errored {
        endpoint: String,
        key: CacheKey,
        message: String,
    },
    /// Administrative: drop every key of an endpoint. Never produced by the
    /// request lifecycle itself.
    Reset { endpoint: String },
}

/// All per-key state of one engine instance:
/// `endpoint name -> cache key -> PerKeyState`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiState {
    endpoints: HashMap<String, HashMap<CacheKey, PerKeyState>>,
}

impl ApiState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the state for a key.
    #[must_use]
    pub fn per_key(&self, endpoint: &str, key: &CacheKey) -> Option<&PerKeyState> {
        self.endpoints.get(endpoint)?.get(key)
    }

    /// The keys tracked for an endpoint.
    pub fn keys_of(&self, endpoint: &str) -> impl Iterator<Item = &CacheKey> {
        self.endpoints.get(endpoint).into_iter().flatten().map(|(key, _)| key)
    }

    /// Applies one lifecycle transition.
    ///
    /// Lifecycle transitions never delete a per-key entry; entries are
    /// created lazily as `Idle` on first touch.
    pub fn apply(&mut self, action: CacheAction) {
        match action {
            CacheAction::Loading { endpoint, key } => {
                let state = self.entry(endpoint, key);
                state.status = Status::Loading;
            }
            CacheAction::Succeeded {
                endpoint,
                key,
                normalized,
                stripped,
                is_initial_value,
            } => {
                let state = self.entry(endpoint, key);
                state.status = Status::Success;
                state.normalized = Some(normalized);
                state.stripped = Some(stripped);
                state.error_message = None;
                state.is_initial_value = is_initial_value;
            }
            CacheAction::Errored {
                endpoint,
                key,
                message,
            } => {
                let state = self.entry(endpoint, key);
                state.status = Status::Error;
                state.error_message = Some(message);
            }
            CacheAction::Reset { endpoint } => {
                debug!("Resetting endpoint {}", endpoint);
                self.endpoints.remove(&endpoint);
            }
        }
    }

    fn entry(&mut self, endpoint: String, key: CacheKey) -> &mut PerKeyState {
        self.endpoints
            .entry(endpoint)
            .or_default()
            .entry(key)
            .or_default()
    }
}
