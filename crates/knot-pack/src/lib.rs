//! Roots, typed references and pack sessions for Knot.
//!
//! A [`Container`] owns a content store and a type registry. Each feed is a
//! chain of [`Root`] snapshots, linked by `prev` and numbered by `seq`. A
//! [`Pack`] is a working session over one root: it resolves references
//! lazily, stages new objects in a write buffer, and commits everything in
//! one transaction on [`Pack::save`].
//!
//! # Reference model
//!
//! - [`Dynamic`] -- a typed pointer (schema hash + object hash) that caches
//!   its decoded [`Record`](knot_registry::Record) once resolved
//! - [`Reference`] -- an untyped pointer that resolves to the raw envelope
//! - [`References`] -- an ordered collection that keeps each entry's
//!   [`Position`] current after every structural change
//!
//! # Flags
//!
//! [`Flags`] select how a pack resolves and whether it may write:
//! `ENTIRE_TREE` resolves all top-level entries on open,
//! `ENTIRE_MERKLE_TREES` also materializes nested references,
//! `HASH_TABLE_INDEX` keeps a hash-to-position index, `VIEW_ONLY` forbids
//! mutation, and `NATIVE` decodes payloads into records.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use knot_pack::{Container, Flags};
//! use knot_registry::{Field, Kind, Record, Registry};
//! use knot_types::Hash;
//!
//! let registry = Registry::new();
//! registry.register("demo.Note", vec![Field::new("text", Kind::Str)]).unwrap();
//! let container = Container::in_memory(Arc::new(registry));
//!
//! let feed = Hash::from_bytes(b"notes");
//! let mut pack = container.new_root(feed, Flags::NATIVE).unwrap();
//! pack.append([Record::new("demo.Note").with("text", "hello")]).unwrap();
//! let saved = pack.save().unwrap();
//! assert_eq!(saved.seq, 1);
//!
//! let mut reopened = container.unpack(&saved.hash, Flags::NATIVE).unwrap();
//! let note = reopened.value_at(0).unwrap().unwrap();
//! assert_eq!(note.get("text").and_then(|v| v.as_str()), Some("hello"));
//! ```

pub mod config;
pub mod container;
pub mod dynamic;
pub mod error;
pub mod flags;
pub mod pack;
pub mod reference;
pub mod references;
pub mod root;

pub use config::ContainerConfig;
pub use container::Container;
pub use dynamic::Dynamic;
pub use error::{PackError, PackResult};
pub use flags::Flags;
pub use pack::Pack;
pub use reference::{CollectionId, Position, Reference};
pub use references::{EntryMut, References};
pub use root::{Root, RootPack};
