//! Response normalization.
//!
//! Decomposes a nested response into a skeleton whose entity positions hold
//! ids, plus a flat table collecting one canonical payload per `(kind, id)`.

use crate::{Cardinality, ResponseSchema, SchemaError, SchemaRegistry, SchemaResult};
use cadenza_types::{EntityId, EntityKind, EntityTable};
use serde_json::{Map, Value};

/// The output of [`normalize`]: the id-referenced skeleton and the entities
/// collected out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub result: Value,
    pub entities: EntityTable,
}

/// Decomposes `raw` into a skeleton and a flat entity table.
///
/// Top-level fields declared in `schema` are flattened recursively (an
/// entity's own relations first, then the entity itself); undeclared fields
/// pass through untouched, as do non-object responses. Repeated entities of
/// one kind collapse to a single canonical payload per id — last write wins
/// within the call.
pub fn normalize(
    raw: &Value,
    registry: &SchemaRegistry,
    schema: &ResponseSchema,
) -> SchemaResult<Normalized> {
    let mut entities = EntityTable::new();
    let result = match raw {
        Value::Object(fields) => {
            let mut skeleton = Map::new();
            for (name, value) in fields {
                let replaced = match schema.field(name) {
                    Some(rf) => {
                        flatten_field(value, &rf.kind, rf.cardinality, registry, &mut entities)?
                    }
                    None => value.clone(),
                };
                skeleton.insert(name.clone(), replaced);
            }
            Value::Object(skeleton)
        }
        // A non-object response has no schema fields to flatten.
        other => other.clone(),
    };
    Ok(Normalized { result, entities })
}

fn flatten_field(
    value: &Value,
    kind: &EntityKind,
    cardinality: Cardinality,
    registry: &SchemaRegistry,
    entities: &mut EntityTable,
) -> SchemaResult<Value> {
    match cardinality {
        Cardinality::One => flatten_entity(value, kind, registry, entities),
        Cardinality::Many => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| flatten_entity(item, kind, registry, entities))
                .collect::<SchemaResult<Vec<_>>>()
                .map(Value::Array),
            Value::Null => Ok(Value::Null),
            other => Err(SchemaError::InvalidShape(format!(
                "expected a list of {kind}, got {other}"
            ))),
        },
    }
}

fn flatten_entity(
    value: &Value,
    kind: &EntityKind,
    registry: &SchemaRegistry,
    entities: &mut EntityTable,
) -> SchemaResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let descriptor = registry.descriptor(kind)?;
    let Some(object) = value.as_object() else {
        // An already-flattened reference (relations of a cached entity hold
        // ids, not payloads) stays as-is.
        if EntityId::from_value(value).is_some() {
            return Ok(value.clone());
        }
        return Err(SchemaError::InvalidShape(format!(
            "expected a {kind} object or id, got {value}"
        )));
    };
    let id = object
        .get(&descriptor.id_field)
        .and_then(EntityId::from_value)
        .ok_or_else(|| SchemaError::MissingId {
            kind: kind.clone(),
            field: descriptor.id_field.clone(),
        })?;

    let mut flat = Map::new();
    for (field, field_value) in object {
        let replaced = match descriptor.relation(field) {
            Some(rel) => {
                flatten_field(field_value, &rel.target, rel.cardinality, registry, entities)?
            }
            None => field_value.clone(),
        };
        flat.insert(field.clone(), replaced);
    }
    entities.insert(kind.clone(), id, Value::Object(flat));
    Ok(Value::Number(id.value().into()))
}
