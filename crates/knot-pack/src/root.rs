use knot_registry::DynamicRef;
use knot_store::{Envelope, ROOT_TAG};
use knot_types::{codec, Hash, Timestamp};
use serde::{Deserialize, Serialize};

use crate::dynamic::Dynamic;
use crate::error::{PackError, PackResult};
use crate::reference::CollectionId;
use crate::references::References;

/// Stored form of a root: the payload of a `ROOT_TAG` envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RootWire {
    pub(crate) feed: Hash,
    pub(crate) seq: u64,
    pub(crate) time: Timestamp,
    pub(crate) prev: Hash,
    pub(crate) refs: Vec<DynamicRef>,
}

impl RootWire {
    pub(crate) fn to_envelope(&self) -> PackResult<Envelope> {
        Ok(Envelope::new(ROOT_TAG, codec::encode(self)?))
    }

    pub(crate) fn from_envelope(hash: Hash, envelope: &Envelope) -> PackResult<Self> {
        if !envelope.is_root() {
            return Err(PackError::Decode {
                hash,
                reason: format!("tagged {}, not a root", envelope.schema.short_hex()),
            });
        }
        codec::decode(&envelope.payload).map_err(|e| PackError::Decode {
            hash,
            reason: e.to_string(),
        })
    }
}

pub(crate) fn decode_envelope(hash: Hash, bytes: &[u8]) -> PackResult<Envelope> {
    Envelope::decode(bytes).map_err(|e| PackError::Decode {
        hash,
        reason: e.to_string(),
    })
}

/// A versioned snapshot of top-level references.
///
/// `seq` grows by one on every save and `time` never goes backwards within
/// a feed. `prev` links to the previously saved root (null for the first),
/// and `hash` is the key of this root's own envelope (null until saved).
#[derive(Clone, Debug)]
pub struct Root {
    pub(crate) feed: Hash,
    pub(crate) seq: u64,
    pub(crate) time: Timestamp,
    pub(crate) prev: Hash,
    pub(crate) hash: Hash,
    pub(crate) refs: References,
}

impl Root {
    /// A fresh, unsaved root with no references.
    pub(crate) fn empty(feed: Hash, refs: References) -> Self {
        Self {
            feed,
            seq: 0,
            time: Timestamp::zero(),
            prev: Hash::null(),
            hash: Hash::null(),
            refs,
        }
    }

    /// Rebuild a saved root; every reference starts unresolved.
    pub(crate) fn from_wire(hash: Hash, wire: RootWire, id: CollectionId, indexed: bool) -> Self {
        let items = wire.refs.into_iter().map(Dynamic::new).collect();
        Self {
            feed: wire.feed,
            seq: wire.seq,
            time: wire.time,
            prev: wire.prev,
            hash,
            refs: References::from_items(id, indexed, items),
        }
    }

    pub fn feed(&self) -> Hash {
        self.feed
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn prev(&self) -> Hash {
        self.prev
    }

    /// Key of the saved root envelope; null if never saved.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn is_saved(&self) -> bool {
        !self.hash.is_null()
    }

    /// Top-level references, without resolving anything.
    pub fn refs(&self) -> &References {
        &self.refs
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// A saved root as published to peers: its hash, header fields, and the
/// encoded envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPack {
    pub hash: Hash,
    pub feed: Hash,
    pub seq: u64,
    pub time: Timestamp,
    pub prev: Hash,
    pub data: Vec<u8>,
}

impl RootPack {
    /// Parse and verify an encoded root envelope.
    pub fn decode(data: Vec<u8>) -> PackResult<Self> {
        let hash = Envelope::key_of(&data);
        let envelope = decode_envelope(hash, &data)?;
        let wire = RootWire::from_envelope(hash, &envelope)?;
        Ok(Self {
            hash,
            feed: wire.feed,
            seq: wire.seq,
            time: wire.time,
            prev: wire.prev,
            data,
        })
    }

    /// Top-level targets carried by this root.
    pub fn refs(&self) -> PackResult<Vec<DynamicRef>> {
        let envelope = decode_envelope(self.hash, &self.data)?;
        Ok(RootWire::from_envelope(self.hash, &envelope)?.refs)
    }
}
