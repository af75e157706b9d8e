//! Entity descriptors and response normalization for Cadenza.
//!
//! Converts between the nested shape a remote endpoint returns and a flat,
//! id-referenced form:
//!
//! - [`normalize`] decomposes a nested response into a skeleton (entities
//!   replaced by their ids) plus a flat [`EntityTable`](cadenza_types::EntityTable)
//! - [`denormalize`] reconstructs the nested shape from a skeleton and an
//!   entity table, tolerating absent entities
//!
//! Which fields hold entities is declared, not discovered: an
//! [`EntityDescriptor`] per kind names the id field and nested relations, and
//! a [`ResponseSchema`] names the entity-bearing fields of a response. Both
//! are plain data built once at startup.

mod denormalize;
mod descriptor;
mod error;
mod normalize;

pub use denormalize::{denormalize, Denormalized};
pub use descriptor::{
    Cardinality, EntityDescriptor, Relation, ResponseField, ResponseSchema, SchemaRegistry,
};
pub use error::{SchemaError, SchemaResult};
pub use normalize::{normalize, Normalized};
