//! Content hashing for Knot.
//!
//! Provides the domain-separated BLAKE3 hasher that derives the storage key
//! of every envelope. All crypto operations wrap established libraries.

pub mod hasher;

pub use hasher::ContentHasher;
