//! Declarative endpoint runtime and normalized query cache for Cadenza.
//!
//! Turns a declarative endpoint description into a request/cache state
//! machine so screens never re-implement request deduplication, response
//! normalization, or cache rehydration:
//!
//! 1. A call names an endpoint and passes arguments; the [`key`] module
//!    derives an order-independent cache key.
//! 2. On a miss the endpoint's [`Fetcher`] runs; the response is normalized
//!    into a skeleton plus flat entities, the entities merge into the shared
//!    [`EntityStore`](cadenza_cache::EntityStore), and the skeleton plus a
//!    trimmed id map land in the per-endpoint [`slice`](crate::slice).
//! 3. Every read rehydrates the skeleton against the live table, so
//!    consumers see fresh entity fields no matter which endpoint wrote them.
//!
//! Consumers depend only on [`QueryResponse`]: `{data, status,
//! error_message}`.
//!
//! ```no_run
//! use cadenza_query::{
//!     EndpointDescriptor, EndpointOptions, EngineBuilder, Fetcher, QueryOptions,
//! };
//! use cadenza_cache::EntityStore;
//! use cadenza_schema::{EntityDescriptor, ResponseSchema, SchemaRegistry};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! struct GetUser;
//!
//! #[async_trait::async_trait]
//! impl Fetcher<()> for GetUser {
//!     async fn fetch(&self, args: &Value, _context: &()) -> anyhow::Result<Option<Value>> {
//!         // Call the real transport here.
//!         let _ = args;
//!         Ok(Some(json!({"id": 5, "name": "Alice", "followers": []})))
//!     }
//! }
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let registry =
//!     Arc::new(SchemaRegistry::new().register(EntityDescriptor::new("user").many("followers", "user")));
//! let schema = ResponseSchema::new().one("user", "user");
//! let engine = EngineBuilder::new("user_api", Arc::new(EntityStore::new()), registry, schema)
//!     .endpoint(
//!         EndpointDescriptor::new("getUser", Arc::new(GetUser))
//!             .options(EndpointOptions::cached_by_id("user", "id", "user")),
//!     )
//!     .build(());
//!
//! let response = engine
//!     .query("getUser", &json!({"id": 5}), QueryOptions::default())
//!     .await?;
//! assert!(response.status.is_success());
//! # Ok(())
//! # }
//! ```

mod endpoint;
mod engine;
mod error;
pub mod key;
mod slice;

pub use endpoint::{EndpointDescriptor, EndpointOptions, Fetcher};
pub use engine::{Engine, EngineBuilder, QueryOptions, QueryResponse};
pub use error::{QueryError, QueryResult};
pub use key::{canonical_args, derive_key};
pub use slice::{ApiState, CacheAction, PerKeyState};
