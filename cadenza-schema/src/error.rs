//! Error types for schema operations.

use cadenza_types::{EntityId, EntityKind};
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur during normalization or denormalization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A response or relation referenced a kind with no registered descriptor.
    #[error("no descriptor registered for entity kind: {0}")]
    UnknownKind(EntityKind),

    /// An embedded entity carried no usable id field.
    #[error("entity of kind {kind} has no integral `{field}` field")]
    MissingId { kind: EntityKind, field: String },

    /// A skeleton referenced an entity absent from the supplied table.
    ///
    /// Recoverable: [`denormalize`](crate::denormalize) substitutes null and
    /// records the reference; this error is only produced by
    /// [`Denormalized::require_complete`](crate::Denormalized::require_complete).
    #[error("entity {kind}/{id} is not in the table")]
    MissingEntity { kind: EntityKind, id: EntityId },

    /// A value did not have the shape the schema declares.
    #[error("value does not match schema: {0}")]
    InvalidShape(String),
}
