//! Pluggable per-field merge semantics.

use cadenza_types::EntityKind;
use serde_json::Value;

/// Decides how an incoming entity payload combines with the one already in
/// the table.
///
/// The engine itself never defines field-level merge semantics — it only
/// guarantees that a commit applies whole payloads through this policy.
/// Implement this to customize merging for specific kinds (e.g. preserving
/// locally computed fields on `user` entities).
pub trait MergePolicy: Send + Sync {
    /// Merge `incoming` into `existing`, returning the payload to store.
    fn merge(&self, kind: &EntityKind, existing: &Value, incoming: Value) -> Value;
}

/// Default policy: last write wins per top-level field.
///
/// Incoming fields overwrite, fields only present locally survive. When
/// either side is not an object the incoming payload replaces the existing
/// one wholesale.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldLww;

impl MergePolicy for FieldLww {
    fn merge(&self, _kind: &EntityKind, existing: &Value, incoming: Value) -> Value {
        match (existing.as_object(), incoming) {
            (Some(existing), Value::Object(incoming)) => {
                let mut merged = existing.clone();
                for (field, value) in incoming {
                    merged.insert(field, value);
                }
                Value::Object(merged)
            }
            (_, incoming) => incoming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> EntityKind {
        EntityKind::new("user")
    }

    #[test]
    fn incoming_fields_overwrite() {
        let merged = FieldLww.merge(
            &user(),
            &json!({"name": "old", "plays": 3}),
            json!({"name": "new"}),
        );
        assert_eq!(merged, json!({"name": "new", "plays": 3}));
    }

    #[test]
    fn local_only_fields_survive() {
        let merged = FieldLww.merge(
            &user(),
            &json!({"name": "a", "local_flag": true}),
            json!({"name": "a", "verified": false}),
        );
        assert_eq!(
            merged,
            json!({"name": "a", "local_flag": true, "verified": false})
        );
    }

    #[test]
    fn non_object_replaces_wholesale() {
        let merged = FieldLww.merge(&user(), &json!({"name": "a"}), json!(42));
        assert_eq!(merged, json!(42));
    }
}
