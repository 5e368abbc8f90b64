//! The deterministic binary codec.
//!
//! Every stored record (envelopes, schemas, roots, record payloads) goes
//! through this module. The encoding is bincode with fixed-width little-endian
//! integers, so the same value always produces the same bytes and therefore
//! the same content hash. Whole-buffer decoding rejects trailing bytes.

use std::io::Read;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::TypeError;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Encode a value into a fresh buffer.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, TypeError> {
    options()
        .serialize(value)
        .map_err(|e| TypeError::Encode(e.to_string()))
}

/// Append the encoding of `value` to `out`.
pub fn encode_into<T: Serialize + ?Sized>(out: &mut Vec<u8>, value: &T) -> Result<(), TypeError> {
    options()
        .serialize_into(out, value)
        .map_err(|e| TypeError::Encode(e.to_string()))
}

/// Decode a value that must span the whole buffer.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TypeError> {
    options()
        .reject_trailing_bytes()
        .deserialize(bytes)
        .map_err(|e| TypeError::Decode(e.to_string()))
}

/// Decode one value from the front of `input`, advancing it past the value.
///
/// Reads are bounded by the remaining input length, so a corrupt length
/// prefix cannot trigger an oversized allocation.
pub fn decode_prefix<T: DeserializeOwned>(input: &mut &[u8]) -> Result<T, TypeError> {
    let limit = input.len() as u64;
    let reader: &mut dyn Read = input;
    options()
        .allow_trailing_bytes()
        .with_limit(limit)
        .deserialize_from(reader)
        .map_err(|e| TypeError::Decode(e.to_string()))
}
