//! Declarative schema types.
//!
//! Descriptors replace the reference implementation's runtime schema objects
//! with static data: one [`EntityDescriptor`] per kind names the id field and
//! the nested-entity relations, and a [`ResponseSchema`] names which fields
//! of a response shape hold entities. The normalize/denormalize routines are
//! generic over these.

use crate::{SchemaError, SchemaResult};
use cadenza_types::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a field holds one entity or a list of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// A field of an entity that embeds other entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Field name within the entity payload.
    pub field: String,
    /// Kind of the embedded entity or entities.
    pub target: EntityKind,
    pub cardinality: Cardinality,
}

/// Describes one entity kind: where its id lives and which of its fields
/// embed other entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    /// Field holding the entity's id. Almost always `id`.
    pub id_field: String,
    pub relations: Vec<Relation>,
}

impl EntityDescriptor {
    /// Creates a descriptor with the conventional `id` field and no relations.
    #[must_use]
    pub fn new(kind: impl Into<EntityKind>) -> Self {
        Self {
            kind: kind.into(),
            id_field: "id".to_string(),
            relations: Vec::new(),
        }
    }

    /// Overrides the id field name.
    #[must_use]
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Declares a field embedding a single entity.
    #[must_use]
    pub fn one(mut self, field: impl Into<String>, target: impl Into<EntityKind>) -> Self {
        self.relations.push(Relation {
            field: field.into(),
            target: target.into(),
            cardinality: Cardinality::One,
        });
        self
    }

    /// Declares a field embedding a list of entities.
    #[must_use]
    pub fn many(mut self, field: impl Into<String>, target: impl Into<EntityKind>) -> Self {
        self.relations.push(Relation {
            field: field.into(),
            target: target.into(),
            cardinality: Cardinality::Many,
        });
        self
    }

    /// Looks up the relation declared for a field, if any.
    #[must_use]
    pub fn relation(&self, field: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.field == field)
    }
}

/// An entity-bearing field of a response shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseField {
    pub kind: EntityKind,
    pub cardinality: Cardinality,
}

/// Declares which top-level fields of a response hold entities.
///
/// Fields not named here pass through normalization untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSchema {
    fields: HashMap<String, ResponseField>,
}

impl ResponseSchema {
    /// Creates an empty response schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field holding a single entity.
    #[must_use]
    pub fn one(mut self, field: impl Into<String>, kind: impl Into<EntityKind>) -> Self {
        self.fields.insert(
            field.into(),
            ResponseField {
                kind: kind.into(),
                cardinality: Cardinality::One,
            },
        );
        self
    }

    /// Declares a field holding a list of entities.
    #[must_use]
    pub fn many(mut self, field: impl Into<String>, kind: impl Into<EntityKind>) -> Self {
        self.fields.insert(
            field.into(),
            ResponseField {
                kind: kind.into(),
                cardinality: Cardinality::Many,
            },
        );
        self
    }

    /// Looks up the declaration for a response field, if any.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ResponseField> {
        self.fields.get(name)
    }
}

/// All registered entity descriptors, keyed by kind.
///
/// Built once at startup; immutable thereafter.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    kinds: HashMap<EntityKind, EntityDescriptor>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor. The last registration for a kind wins.
    #[must_use]
    pub fn register(mut self, descriptor: EntityDescriptor) -> Self {
        self.kinds.insert(descriptor.kind.clone(), descriptor);
        self
    }

    /// Looks up the descriptor for a kind.
    pub fn descriptor(&self, kind: &EntityKind) -> SchemaResult<&EntityDescriptor> {
        self.kinds
            .get(kind)
            .ok_or_else(|| SchemaError::UnknownKind(kind.clone()))
    }

    /// Whether a kind is registered.
    #[must_use]
    pub fn contains(&self, kind: &EntityKind) -> bool {
        self.kinds.contains_key(kind)
    }
}
