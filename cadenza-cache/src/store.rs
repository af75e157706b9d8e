//! The shared entity store.

use crate::{FieldLww, MergePolicy};
use cadenza_schema::{denormalize, Denormalized, ResponseSchema, SchemaRegistry, SchemaResult};
use cadenza_types::{EntityId, EntityKind, EntityTable, StrippedEntityMap};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// The process-wide entity table plus its change signal.
///
/// Writes are merges at the `(kind, id)` level; one [`commit`](Self::commit)
/// holds the write lock for the whole normalize result, so a reader never
/// observes a half-written entity. The lock is never held across an await
/// point — every operation here is synchronous.
pub struct EntityStore {
    table: RwLock<EntityTable>,
    policy: Arc<dyn MergePolicy>,
    /// Bumped once per non-empty commit. Subscribers re-derive their cached
    /// views when this moves.
    version: watch::Sender<u64>,
}

impl EntityStore {
    /// Creates a store with the default [`FieldLww`] merge policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(Arc::new(FieldLww))
    }

    /// Creates a store with a custom merge policy.
    #[must_use]
    pub fn with_policy(policy: Arc<dyn MergePolicy>) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            table: RwLock::new(EntityTable::new()),
            policy,
            version,
        }
    }

    /// Merges a normalized result's entities into the shared table.
    ///
    /// Each `(kind, id)` entry is combined with any existing payload through
    /// the merge policy. Entities are only ever added or merged, never
    /// removed. An empty commit does not bump the version.
    pub fn commit(&self, incoming: EntityTable) {
        if incoming.is_empty() {
            return;
        }
        let count = incoming.len();
        {
            let mut table = self.table.write();
            for (kind, id, payload) in incoming.into_entries() {
                let merged = match table.get(&kind, id) {
                    Some(existing) => self.policy.merge(&kind, existing, payload),
                    None => payload,
                };
                table.insert(kind, id, merged);
            }
        }
        self.version.send_modify(|v| *v += 1);
        debug!("Committed {} entities (version {})", count, self.version());
    }

    /// Looks up one entity's payload.
    #[must_use]
    pub fn get(&self, kind: &EntityKind, id: EntityId) -> Option<Value> {
        self.table.read().get(kind, id).cloned()
    }

    /// Whether an entity is present.
    #[must_use]
    pub fn contains(&self, kind: &EntityKind, id: EntityId) -> bool {
        self.table.read().contains(kind, id)
    }

    /// Whether every one of `ids` is present under `kind`.
    #[must_use]
    pub fn contains_all(&self, kind: &EntityKind, ids: &[EntityId]) -> bool {
        let table = self.table.read();
        ids.iter().all(|id| table.contains(kind, *id))
    }

    /// Total number of entities across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Whether the table holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// The current version. Starts at 0; bumps once per non-empty commit.
    #[must_use]
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Subscribes to version changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Copies out the entities a stripped map depends on.
    ///
    /// Relation fields of cached payloads hold bare ids, so the copy follows
    /// them transitively — a skeleton's dependency set includes entities its
    /// entities reference, even when those arrived through other endpoints.
    /// Absent ids are simply not included; denormalization reports them as
    /// missing.
    #[must_use]
    pub fn snapshot_restricted(
        &self,
        stripped: &StrippedEntityMap,
        registry: &SchemaRegistry,
    ) -> EntityTable {
        let table = self.table.read();
        let mut restricted = EntityTable::new();
        let mut queue: Vec<(EntityKind, EntityId)> = stripped
            .iter()
            .flat_map(|(kind, ids)| ids.iter().map(|id| (kind.clone(), *id)))
            .collect();

        while let Some((kind, id)) = queue.pop() {
            if restricted.contains(&kind, id) {
                continue;
            }
            let Some(payload) = table.get(&kind, id) else {
                continue;
            };
            if let (Ok(descriptor), Some(object)) = (registry.descriptor(&kind), payload.as_object())
            {
                for relation in &descriptor.relations {
                    match object.get(&relation.field) {
                        Some(Value::Array(items)) => {
                            for item in items {
                                if let Some(rid) = EntityId::from_value(item) {
                                    queue.push((relation.target.clone(), rid));
                                }
                            }
                        }
                        Some(reference) => {
                            if let Some(rid) = EntityId::from_value(reference) {
                                queue.push((relation.target.clone(), rid));
                            }
                        }
                        None => {}
                    }
                }
            }
            restricted.insert(kind, id, payload.clone());
        }
        restricted
    }

    /// Re-denormalizes a skeleton against the *current* table contents,
    /// restricted to the ids named in the stripped map (plus what they
    /// transitively reference).
    ///
    /// This is what makes reads reactive: a consumer re-runs this after the
    /// version moves and sees the latest entity fields without re-fetching.
    pub fn rehydrate(
        &self,
        skeleton: &Value,
        stripped: &StrippedEntityMap,
        registry: &SchemaRegistry,
        schema: &ResponseSchema,
    ) -> SchemaResult<Denormalized> {
        let restricted = self.snapshot_restricted(stripped, registry);
        denormalize(skeleton, registry, schema, &restricted)
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}
