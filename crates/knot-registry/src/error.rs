//! Error types for registry operations.

use knot_store::StoreError;
use knot_types::{Hash, TypeError};
use thiserror::Error;

/// Errors that can occur while registering types or converting records.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A record carries a type name that was never registered.
    #[error("unregistered type: {name}")]
    UnregisteredType { name: String },

    /// The type name is already bound to a schema.
    #[error("type name already registered: {name}")]
    DuplicateName { name: String },

    /// The field layout is already bound to another type name.
    #[error("type {name} has the same layout as registered type {existing}")]
    DuplicateType { name: String, existing: String },

    /// A type or field name is malformed.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// No registered schema has this identifier.
    #[error("unknown schema: {0}")]
    UnknownSchema(Hash),

    /// A record does not follow its schema's field layout.
    #[error("record of type {type_name} does not match schema: {reason}")]
    FieldMismatch { type_name: String, reason: String },

    /// A payload does not match the schema's field layout.
    #[error("decode error: {0}")]
    Decode(String),

    /// Encoding through the codec failed.
    #[error("codec error: {0}")]
    Codec(#[from] TypeError),

    /// Reading or writing the schema catalogue failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The registry lock was poisoned by a panicking writer.
    #[error("registry lock poisoned: {0}")]
    Poisoned(String),
}

/// Convenience type alias for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
