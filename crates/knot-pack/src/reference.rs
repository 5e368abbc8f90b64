use knot_store::Envelope;
use knot_types::Hash;

use crate::error::PackResult;
use crate::pack::Pack;

/// Identifier of a [`References`](crate::References) collection, unique
/// within one container.
pub type CollectionId = u64;

/// Where an attached reference sits: its collection and index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    pub collection: CollectionId,
    pub index: usize,
}

/// An untyped pointer: a bare content hash.
///
/// Resolving it yields the stored envelope, schema id and payload, with no
/// registry involved.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reference {
    hash: Hash,
    envelope: Option<Envelope>,
}

impl Reference {
    pub fn new(hash: Hash) -> Self {
        Self {
            hash,
            envelope: None,
        }
    }

    pub(crate) fn resolved(hash: Hash, envelope: Envelope) -> Self {
        Self {
            hash,
            envelope: Some(envelope),
        }
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn is_blank(&self) -> bool {
        self.hash.is_null()
    }

    pub fn is_resolved(&self) -> bool {
        self.envelope.is_some()
    }

    /// The envelope, if already resolved. Never does I/O.
    pub fn cached(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// Resolve through `pack` and return the envelope. `None` when blank.
    pub fn value(&mut self, pack: &mut Pack) -> PackResult<Option<&Envelope>> {
        if self.is_blank() {
            return Ok(None);
        }
        if self.envelope.is_none() {
            self.envelope = Some(pack.envelope(&self.hash)?);
        }
        Ok(self.envelope.as_ref())
    }
}
