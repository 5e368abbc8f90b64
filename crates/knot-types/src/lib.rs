//! Foundation types for Knot, the content-addressed object-graph store.
//!
//! Every other Knot crate depends on `knot-types`.
//!
//! # Key Types
//!
//! - [`Hash`] -- Content-addressed identifier (BLAKE3 hash)
//! - [`Timestamp`] -- Nanosecond wall-clock stamp carried by roots
//! - [`codec`] -- The deterministic binary codec used for every stored record

pub mod codec;
pub mod error;
pub mod hash;
pub mod time;

pub use error::TypeError;
pub use hash::Hash;
pub use time::Timestamp;
