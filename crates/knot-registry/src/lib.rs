//! Type registry for Knot.
//!
//! The registry maps semantic type names (such as `knot.Note`) to
//! [`Schema`]s and converts [`Record`]s into payload bytes and back. Every
//! schema is itself content-addressed: its id is the storage key of the
//! envelope that carries it, so the catalogue saved by [`Registry::save`]
//! can be diffed and replicated like any other object.
//!
//! # Modules
//!
//! - [`error`] -- Error types for registry operations
//! - [`schema`] -- [`Schema`], [`Field`] and field [`Kind`]s
//! - [`value`] -- [`Record`], [`Value`] and typed pointers ([`DynamicRef`])
//! - [`native`] -- The [`Native`] trait for Rust types with a record layout
//! - [`names`] -- Type and field name validation
//! - [`registry`] -- The shared [`Registry`]

mod codec;
pub mod error;
pub mod names;
pub mod native;
pub mod registry;
pub mod schema;
pub mod value;

pub use error::{RegistryError, RegistryResult};
pub use names::{validate_field_name, validate_type_name};
pub use native::Native;
pub use registry::Registry;
pub use schema::{Field, Kind, Schema};
pub use value::{DynamicRef, Record, Value};
