//! Endpoint descriptors and the fetch seam.

use async_trait::async_trait;
use cadenza_types::EntityKind;
use serde_json::Value;
use std::sync::Arc;

/// The transport seam of an endpoint.
///
/// Implementations wrap whatever actually performs the remote call — an HTTP
/// client, an SDK method — and receive the externally supplied context of
/// type `C`; the engine never constructs or inspects the context.
///
/// `Ok(None)` means the call resolved but carried no usable payload; the
/// runtime records it as an error without retrying.
#[async_trait]
pub trait Fetcher<C>: Send + Sync {
    /// Performs the remote call.
    async fn fetch(&self, args: &Value, context: &C) -> anyhow::Result<Option<Value>>;

    /// Called just after a fetch is dispatched.
    fn on_query_started(&self, args: &Value) {
        let _ = args;
    }

    /// Called after a fetch's result was committed.
    fn on_query_success(&self, args: &Value, normalized: &Value) {
        let _ = (args, normalized);
    }
}

/// Optional cache metadata for an endpoint.
///
/// `kind` + `schema_key` + one of the arg-key fields enable the
/// single-entity (or id-list) cache-hit shortcut: a first read whose target
/// entities are already in the shared table synthesizes a Success state
/// without fetching.
#[derive(Debug, Clone, Default)]
pub struct EndpointOptions {
    /// Kind of the entity the shortcut looks up.
    pub kind: Option<EntityKind>,
    /// Argument field holding a single entity id.
    pub id_arg_key: Option<String>,
    /// Argument field holding a list of entity ids. The shortcut applies
    /// only when every listed id is present.
    pub id_list_arg_key: Option<String>,
    /// Response field the fetch result is wrapped under before
    /// normalization, and the field returned data is narrowed to.
    pub schema_key: Option<String>,
}

impl EndpointOptions {
    /// Shorthand for a single-entity endpoint (`getUser {id}` style).
    #[must_use]
    pub fn cached_by_id(
        kind: impl Into<EntityKind>,
        id_arg_key: impl Into<String>,
        schema_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: Some(kind.into()),
            id_arg_key: Some(id_arg_key.into()),
            id_list_arg_key: None,
            schema_key: Some(schema_key.into()),
        }
    }

    /// Shorthand for an id-list endpoint (`getUsers {ids}` style).
    #[must_use]
    pub fn cached_by_id_list(
        kind: impl Into<EntityKind>,
        id_list_arg_key: impl Into<String>,
        schema_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: Some(kind.into()),
            id_arg_key: None,
            id_list_arg_key: Some(id_list_arg_key.into()),
            schema_key: Some(schema_key.into()),
        }
    }

    /// Shorthand for an endpoint whose response is wrapped under a schema
    /// key but never shortcut from cache.
    #[must_use]
    pub fn keyed(schema_key: impl Into<String>) -> Self {
        Self {
            schema_key: Some(schema_key.into()),
            ..Self::default()
        }
    }
}

/// A named, declarative description of one kind of remote fetch.
///
/// Registered once at engine construction; immutable thereafter.
pub struct EndpointDescriptor<C> {
    name: String,
    fetcher: Arc<dyn Fetcher<C>>,
    options: EndpointOptions,
}

impl<C> EndpointDescriptor<C> {
    /// Creates a descriptor with default options.
    #[must_use]
    pub fn new(name: impl Into<String>, fetcher: Arc<dyn Fetcher<C>>) -> Self {
        Self {
            name: name.into(),
            fetcher,
            options: EndpointOptions::default(),
        }
    }

    /// Attaches cache metadata.
    #[must_use]
    pub fn options(mut self, options: EndpointOptions) -> Self {
        self.options = options;
        self
    }

    /// The endpoint's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn fetcher(&self) -> &Arc<dyn Fetcher<C>> {
        &self.fetcher
    }

    pub(crate) fn cache_options(&self) -> &EndpointOptions {
        &self.options
    }
}

impl<C> std::fmt::Debug for EndpointDescriptor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
