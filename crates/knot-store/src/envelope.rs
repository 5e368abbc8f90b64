use knot_crypto::ContentHasher;
use knot_types::{codec, Hash};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Type tag of envelopes that carry a serialized schema.
pub const SCHEMA_TAG: Hash = Hash::tag("knot:schema");

/// Type tag of envelopes that carry a serialized root snapshot.
pub const ROOT_TAG: Hash = Hash::tag("knot:root");

/// The unit of storage: a schema identifier plus an opaque payload.
///
/// An envelope is stored under the content hash of its own encoding. The
/// encoding starts with the 32 raw bytes of `schema`, which is what
/// [`ContentStore::find_by_schema`](crate::ContentStore::find_by_schema)
/// matches on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Schema identifier (or a reserved tag).
    pub schema: Hash,
    /// Encoded record.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(schema: Hash, payload: Vec<u8>) -> Self {
        Self { schema, payload }
    }

    /// Returns `true` if the envelope carries a schema.
    pub fn is_schema(&self) -> bool {
        self.schema == SCHEMA_TAG
    }

    /// Returns `true` if the envelope carries a root snapshot.
    pub fn is_root(&self) -> bool {
        self.schema == ROOT_TAG
    }

    /// Serialize the envelope.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(codec::encode(self)?)
    }

    /// Deserialize an envelope.
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        Ok(codec::decode(bytes)?)
    }

    /// Serialize the envelope and derive its storage key.
    pub fn encode_with_key(&self) -> StoreResult<(Hash, Vec<u8>)> {
        let bytes = self.encode()?;
        Ok((Self::key_of(&bytes), bytes))
    }

    /// The storage key of this envelope.
    pub fn key(&self) -> StoreResult<Hash> {
        Ok(self.encode_with_key()?.0)
    }

    /// The storage key of already-encoded bytes.
    pub fn key_of(bytes: &[u8]) -> Hash {
        ContentHasher::OBJECT.hash(bytes)
    }
}
