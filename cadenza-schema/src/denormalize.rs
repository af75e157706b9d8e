//! Skeleton denormalization.
//!
//! Reconstructs the nested response shape from a skeleton of ids and an
//! entity table. Absent entities are recoverable: the reference position
//! becomes null and the `(kind, id)` is recorded, so a caller can render
//! partial data instead of failing.

use crate::{Cardinality, ResponseSchema, SchemaError, SchemaRegistry, SchemaResult};
use cadenza_types::{EntityId, EntityKind, EntityTable};
use serde_json::{Map, Value};

/// The output of [`denormalize`]: the reconstructed value and the entity
/// references that were absent from the table.
#[derive(Debug, Clone, PartialEq)]
pub struct Denormalized {
    pub data: Value,
    pub missing: Vec<(EntityKind, EntityId)>,
}

impl Denormalized {
    /// Whether every referenced entity was present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Returns the data only if every referenced entity was present,
    /// otherwise the first absent reference as [`SchemaError::MissingEntity`].
    pub fn require_complete(self) -> SchemaResult<Value> {
        match self.missing.into_iter().next() {
            None => Ok(self.data),
            Some((kind, id)) => Err(SchemaError::MissingEntity { kind, id }),
        }
    }
}

/// Reconstructs the nested shape of `skeleton` against `entities`.
///
/// The inverse of [`normalize`](crate::normalize) when the table holds every
/// referenced entity. Fields not declared in `schema` pass through untouched.
pub fn denormalize(
    skeleton: &Value,
    registry: &SchemaRegistry,
    schema: &ResponseSchema,
    entities: &EntityTable,
) -> SchemaResult<Denormalized> {
    let mut missing = Vec::new();
    let mut in_progress = Vec::new();
    let data = match skeleton {
        Value::Object(fields) => {
            let mut out = Map::new();
            for (name, value) in fields {
                let expanded = match schema.field(name) {
                    Some(rf) => expand_field(
                        value,
                        &rf.kind,
                        rf.cardinality,
                        registry,
                        entities,
                        &mut missing,
                        &mut in_progress,
                    )?,
                    None => value.clone(),
                };
                out.insert(name.clone(), expanded);
            }
            Value::Object(out)
        }
        other => other.clone(),
    };
    Ok(Denormalized { data, missing })
}

fn expand_field(
    value: &Value,
    kind: &EntityKind,
    cardinality: Cardinality,
    registry: &SchemaRegistry,
    entities: &EntityTable,
    missing: &mut Vec<(EntityKind, EntityId)>,
    in_progress: &mut Vec<(EntityKind, EntityId)>,
) -> SchemaResult<Value> {
    match cardinality {
        Cardinality::One => expand_entity(value, kind, registry, entities, missing, in_progress),
        Cardinality::Many => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| expand_entity(item, kind, registry, entities, missing, in_progress))
                .collect::<SchemaResult<Vec<_>>>()
                .map(Value::Array),
            Value::Null => Ok(Value::Null),
            other => Err(SchemaError::InvalidShape(format!(
                "expected a list of {kind} ids, got {other}"
            ))),
        },
    }
}

fn expand_entity(
    reference: &Value,
    kind: &EntityKind,
    registry: &SchemaRegistry,
    entities: &EntityTable,
    missing: &mut Vec<(EntityKind, EntityId)>,
    in_progress: &mut Vec<(EntityKind, EntityId)>,
) -> SchemaResult<Value> {
    if reference.is_null() {
        return Ok(Value::Null);
    }
    let Some(id) = EntityId::from_value(reference) else {
        return Err(SchemaError::InvalidShape(format!(
            "expected a {kind} id, got {reference}"
        )));
    };
    // An entity currently being expanded higher up the stack stays an id
    // reference; JSON cannot represent the cycle.
    if in_progress.iter().any(|(k, i)| k == kind && *i == id) {
        return Ok(reference.clone());
    }
    let Some(payload) = entities.get(kind, id) else {
        missing.push((kind.clone(), id));
        return Ok(Value::Null);
    };
    let Some(object) = payload.as_object() else {
        return Ok(payload.clone());
    };
    let descriptor = registry.descriptor(kind)?;

    in_progress.push((kind.clone(), id));
    let mut out = Map::new();
    for (field, field_value) in object {
        let expanded = match descriptor.relation(field) {
            Some(rel) => expand_field(
                field_value,
                &rel.target,
                rel.cardinality,
                registry,
                entities,
                missing,
                in_progress,
            )?,
            None => field_value.clone(),
        };
        out.insert(field.clone(), expanded);
    }
    in_progress.pop();
    Ok(Value::Object(out))
}
