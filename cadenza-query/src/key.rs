//! Cache key derivation.
//!
//! Two argument values that are deep-equal must derive the same key no
//! matter how their properties were ordered, so the key is the compact JSON
//! text of the arguments with every object's keys recursively sorted. No
//! hashing: distinct argument sets derive distinct keys.

use crate::{QueryError, QueryResult};
use cadenza_types::CacheKey;
use serde::Serialize;
use serde_json::{Map, Value};

/// Converts arbitrary fetch arguments into their canonical JSON value.
///
/// Fails fast with [`QueryError::UnserializableArgs`] for values JSON cannot
/// represent (non-string map keys, non-finite floats).
pub fn canonical_args<T: Serialize>(args: &T) -> QueryResult<Value> {
    serde_json::to_value(args).map_err(|e| QueryError::UnserializableArgs(e.to_string()))
}

/// Derives the cache key for canonical arguments.
///
/// Pure; order-independent by construction (does not rely on the map
/// implementation's iteration order).
#[must_use]
pub fn derive_key(args: &Value) -> CacheKey {
    CacheKey::new(sorted(args).to_string())
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&fields[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
