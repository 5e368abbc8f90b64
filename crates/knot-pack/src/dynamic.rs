use knot_registry::{DynamicRef, Record, Registry};
use knot_store::Envelope;
use knot_types::Hash;

use crate::error::{PackError, PackResult};
use crate::pack::Pack;
use crate::reference::{CollectionId, Position};
use crate::references::References;

/// A decoded object held by a resolved [`Dynamic`].
#[derive(Clone, Debug)]
pub(crate) struct Materialized {
    pub(crate) payload: Vec<u8>,
    /// `None` when the pack runs without `NATIVE`.
    pub(crate) record: Option<Record>,
    /// Nested references in field walk order, with `ENTIRE_MERKLE_TREES`.
    pub(crate) children: Option<References>,
    /// The envelope is not staged or stored yet.
    pub(crate) dirty: bool,
}

#[derive(Clone, Debug)]
pub(crate) enum State {
    Unresolved,
    Resolved(Box<Materialized>),
}

/// A typed, lazily resolved pointer to a stored object.
///
/// A `Dynamic` starts unresolved (only its target is known). Resolving it
/// through a [`Pack`] fetches and decodes the object once; later reads are
/// served from the cached value. A dynamic held by a [`References`]
/// collection records its position there.
#[derive(Clone, Debug)]
pub struct Dynamic {
    pub(crate) target: DynamicRef,
    pub(crate) state: State,
    position: Option<Position>,
}

impl Dynamic {
    /// An unresolved reference to `target`.
    pub fn new(target: DynamicRef) -> Self {
        Self {
            target,
            state: State::Unresolved,
            position: None,
        }
    }

    /// A reference that points nowhere.
    pub fn blank() -> Self {
        Self::new(DynamicRef::blank())
    }

    pub(crate) fn materialized(target: DynamicRef, materialized: Materialized) -> Self {
        Self {
            target,
            state: State::Resolved(Box::new(materialized)),
            position: None,
        }
    }

    pub fn target(&self) -> DynamicRef {
        self.target
    }

    pub fn schema(&self) -> Hash {
        self.target.schema
    }

    /// Hash of the referenced object.
    pub fn hash(&self) -> Hash {
        self.target.object
    }

    pub fn is_blank(&self) -> bool {
        self.target.is_blank()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, State::Resolved(_))
    }

    /// Modified since the last save.
    pub fn is_dirty(&self) -> bool {
        match &self.state {
            State::Unresolved => false,
            State::Resolved(m) => {
                m.dirty || m.children.as_ref().is_some_and(References::is_modified)
            }
        }
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn is_attached(&self) -> bool {
        self.position.is_some()
    }

    pub fn attach(&mut self, collection: CollectionId, index: usize) {
        self.position = Some(Position { collection, index });
    }

    pub fn detach(&mut self) {
        self.position = None;
    }

    /// The decoded record, if resolved in native mode. Never does I/O.
    pub fn cached(&self) -> Option<&Record> {
        match &self.state {
            State::Resolved(m) => m.record.as_ref(),
            State::Unresolved => None,
        }
    }

    /// The raw payload, if resolved. Never does I/O.
    pub fn cached_payload(&self) -> Option<&[u8]> {
        match &self.state {
            State::Resolved(m) => Some(&m.payload),
            State::Unresolved => None,
        }
    }

    /// Nested references, when resolved with `ENTIRE_MERKLE_TREES`.
    pub fn children(&self) -> Option<&References> {
        match &self.state {
            State::Resolved(m) => m.children.as_ref(),
            State::Unresolved => None,
        }
    }

    /// Mutable access to the nested references. Changing a child makes the
    /// next save re-encode this object with the child's new hash.
    pub fn children_mut(&mut self) -> Option<&mut References> {
        match &mut self.state {
            State::Resolved(m) => m.children.as_mut(),
            State::Unresolved => None,
        }
    }

    /// Resolve through `pack` and return the record. `None` when blank.
    ///
    /// Fails with `RawMode` if the pack does not decode records.
    pub fn value(&mut self, pack: &mut Pack) -> PackResult<Option<&Record>> {
        pack.resolve(self)?;
        if self.is_blank() {
            return Ok(None);
        }
        match self.cached() {
            Some(record) => Ok(Some(record)),
            None => Err(PackError::RawMode),
        }
    }

    /// Resolve through `pack` and return the raw payload. `None` when blank.
    pub fn payload(&mut self, pack: &mut Pack) -> PackResult<Option<&[u8]>> {
        pack.resolve(self)?;
        Ok(self.cached_payload())
    }

    /// Replace the referenced object.
    ///
    /// Encodes `record` through `registry`, retargets this reference and
    /// marks it dirty. Nothing is written until the pack saves.
    pub fn set_value(&mut self, registry: &Registry, record: Record) -> PackResult<()> {
        let (schema, payload) = registry.encode(&record)?;
        let key = Envelope::new(schema, payload.clone()).key()?;
        self.target = DynamicRef::new(schema, key);
        self.state = State::Resolved(Box::new(Materialized {
            payload,
            record: Some(record),
            children: None,
            dirty: true,
        }));
        Ok(())
    }

    pub(crate) fn mark_saved(&mut self) {
        if let State::Resolved(m) = &mut self.state {
            m.dirty = false;
            if let Some(children) = m.children.as_mut() {
                children.mark_saved();
            }
        }
    }
}

impl PartialEq for Dynamic {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

impl Eq for Dynamic {}
