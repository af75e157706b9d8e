//! Flat entity maps.
//!
//! [`EntityTable`] is the `kind -> id -> payload` form a normalized response
//! decomposes into, and also the shape of the process-wide shared table.
//! [`StrippedEntityMap`] is the trimmed `kind -> ids` index a cache key keeps
//! so it can rehydrate against the live table without duplicating payloads.

use crate::{EntityId, EntityKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A flat table of entities addressed by `(kind, id)`.
///
/// Payloads are opaque JSON. The table is a plain value type; sharing and
/// merge policy live in the entity store, not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityTable {
    entries: HashMap<EntityKind, HashMap<EntityId, Value>>,
}

impl EntityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entity payload, returning the previous payload if any.
    ///
    /// Within one normalization pass, repeated entities of the same kind and
    /// id collapse to the last inserted payload.
    pub fn insert(&mut self, kind: EntityKind, id: EntityId, payload: Value) -> Option<Value> {
        self.entries.entry(kind).or_default().insert(id, payload)
    }

    /// Looks up an entity payload.
    #[must_use]
    pub fn get(&self, kind: &EntityKind, id: EntityId) -> Option<&Value> {
        self.entries.get(kind)?.get(&id)
    }

    /// Whether an entity is present.
    #[must_use]
    pub fn contains(&self, kind: &EntityKind, id: EntityId) -> bool {
        self.get(kind, id).is_some()
    }

    /// Total number of entities across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    /// Whether the table holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(HashMap::is_empty)
    }

    /// Iterates over all `(kind, id, payload)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityKind, EntityId, &Value)> {
        self.entries
            .iter()
            .flat_map(|(kind, entities)| entities.iter().map(move |(id, v)| (kind, *id, v)))
    }

    /// Consumes the table, yielding owned `(kind, id, payload)` entries.
    pub fn into_entries(self) -> impl Iterator<Item = (EntityKind, EntityId, Value)> {
        self.entries.into_iter().flat_map(|(kind, entities)| {
            entities.into_iter().map(move |(id, v)| (kind.clone(), id, v))
        })
    }

    /// Reduces the table to its `kind -> ids` index.
    ///
    /// Ids are sorted so two tables holding the same entities strip to equal
    /// maps regardless of insertion order.
    #[must_use]
    pub fn strip(&self) -> StrippedEntityMap {
        let mut stripped = StrippedEntityMap::default();
        for (kind, id, _) in self.iter() {
            stripped.insert(kind.clone(), id);
        }
        stripped
    }
}

/// The subset of `(kind, id)` addresses a normalized skeleton depends on.
///
/// Stored per cache key instead of the entity payloads themselves, keeping
/// per-key state small and making every read re-resolve against the live
/// shared table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrippedEntityMap {
    ids: HashMap<EntityKind, Vec<EntityId>>,
}

impl StrippedEntityMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a dependency on `(kind, id)`. Keeps ids sorted and deduplicated.
    pub fn insert(&mut self, kind: EntityKind, id: EntityId) {
        let ids = self.ids.entry(kind).or_default();
        if let Err(pos) = ids.binary_search(&id) {
            ids.insert(pos, id);
        }
    }

    /// The ids this map depends on for a kind.
    #[must_use]
    pub fn ids_of(&self, kind: &EntityKind) -> &[EntityId] {
        self.ids.get(kind).map_or(&[], Vec::as_slice)
    }

    /// Iterates over `(kind, ids)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityKind, &[EntityId])> {
        self.ids.iter().map(|(kind, ids)| (kind, ids.as_slice()))
    }

    /// Whether the map names no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.values().all(Vec::is_empty)
    }
}
