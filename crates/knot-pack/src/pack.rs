use std::collections::HashMap;
use std::sync::Arc;

use knot_registry::{DynamicRef, Record, Registry};
use knot_store::{Batch, Envelope, RootEntry};
use knot_types::{Hash, Timestamp};
use tracing::{debug, info};

use crate::container::Shared;
use crate::dynamic::{Dynamic, Materialized, State};
use crate::error::{PackError, PackResult};
use crate::flags::Flags;
use crate::reference::Reference;
use crate::references::References;
use crate::root::{decode_envelope, Root, RootPack, RootWire};

/// Object access for one pack: write buffer, read cache, then the store.
struct Loader {
    shared: Arc<Shared>,
    flags: Flags,
    /// Staged objects, committed by the next save.
    unsaved: HashMap<Hash, Vec<u8>>,
    /// Objects known to be in the store.
    cache: HashMap<Hash, Vec<u8>>,
}

impl Loader {
    fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    fn check_size(&self, hash: &Hash, size: usize) -> PackResult<()> {
        let max = self.shared.config.max_object_size;
        if size > max {
            return Err(PackError::ObjectTooLarge {
                hash: *hash,
                size,
                max,
            });
        }
        Ok(())
    }

    fn get(&mut self, hash: &Hash) -> PackResult<&[u8]> {
        if !self.unsaved.contains_key(hash) && !self.cache.contains_key(hash) {
            let bytes = self
                .shared
                .store
                .try_get_raw(hash)?
                .ok_or(PackError::NotFound(*hash))?;
            self.cache.insert(*hash, bytes);
        }
        self.unsaved
            .get(hash)
            .or_else(|| self.cache.get(hash))
            .map(Vec::as_slice)
            .ok_or(PackError::NotFound(*hash))
    }

    fn envelope(&mut self, hash: &Hash) -> PackResult<Envelope> {
        let bytes = self.get(hash)?;
        decode_envelope(*hash, bytes)
    }

    /// Encode `record` into a detached, resolved dynamic plus the envelope
    /// bytes to stage for it.
    fn encode(&self, record: Record) -> PackResult<(Dynamic, Vec<u8>)> {
        if !self.flags.contains(Flags::NATIVE) {
            return Err(PackError::RawMode);
        }
        let (schema, payload) = self.registry().encode(&record)?;
        self.wrap(schema, payload, Some(record))
    }

    fn wrap(
        &self,
        schema: Hash,
        payload: Vec<u8>,
        record: Option<Record>,
    ) -> PackResult<(Dynamic, Vec<u8>)> {
        let (key, bytes) = Envelope::new(schema, payload.clone()).encode_with_key()?;
        self.check_size(&key, bytes.len())?;
        let dynamic = Dynamic::materialized(
            DynamicRef::new(schema, key),
            Materialized {
                payload,
                record,
                children: None,
                dirty: false,
            },
        );
        Ok((dynamic, bytes))
    }

    fn stage(&mut self, dynamic: &Dynamic, bytes: Vec<u8>) {
        debug!(hash = %dynamic.hash().short_hex(), size = bytes.len(), "staged");
        self.unsaved.insert(dynamic.hash(), bytes);
    }

    fn resolve(&mut self, d: &mut Dynamic) -> PackResult<()> {
        if d.is_blank() {
            return Ok(());
        }
        let merkle = self.flags.contains(Flags::ENTIRE_MERKLE_TREES);
        if let State::Resolved(m) = &mut d.state {
            let m = &mut **m;
            if merkle && m.children.is_none() {
                if let Some(record) = &m.record {
                    m.children = Some(self.resolve_children(record)?);
                }
            }
            return Ok(());
        }

        let hash = d.hash();
        let envelope = self.envelope(&hash)?;
        if envelope.schema != d.schema() {
            return Err(PackError::Decode {
                hash,
                reason: format!(
                    "stored schema {} does not match reference schema {}",
                    envelope.schema.short_hex(),
                    d.schema().short_hex()
                ),
            });
        }
        let record = if self.flags.contains(Flags::NATIVE) {
            Some(self.registry().decode(&envelope.schema, &envelope.payload)?)
        } else {
            None
        };
        let children = match &record {
            Some(r) if merkle => Some(self.resolve_children(r)?),
            _ => None,
        };
        debug!(hash = %hash.short_hex(), nested = children.is_some(), "resolved");
        d.state = State::Resolved(Box::new(Materialized {
            payload: envelope.payload,
            record,
            children,
            dirty: false,
        }));
        Ok(())
    }

    fn resolve_children(&mut self, record: &Record) -> PackResult<References> {
        let mut items: Vec<Dynamic> = record.dynamic_refs().into_iter().map(Dynamic::new).collect();
        for item in &mut items {
            self.resolve(item)?;
        }
        Ok(References::from_items(
            self.shared.next_collection(),
            self.flags.contains(Flags::HASH_TABLE_INDEX),
            items,
        ))
    }

    /// Stage the envelopes of every dirty object under `d`, re-encoding
    /// parents whose children moved, were added or were removed. Dirty
    /// markers are left for the caller to clear once the commit succeeded.
    fn flush(&self, d: &mut Dynamic, staged: &mut Vec<(Hash, Vec<u8>)>) -> PackResult<()> {
        let State::Resolved(m) = &mut d.state else {
            return Ok(());
        };
        let Materialized {
            payload,
            record,
            children,
            dirty,
        } = &mut **m;

        if let Some(children) = children.as_mut() {
            for child in children.iter_mut() {
                self.flush(child, staged)?;
            }
            children.reattach();
            if let Some(record) = record.as_mut() {
                if record.assign_refs(&children.targets())? {
                    let (schema, encoded) = self.registry().encode(record)?;
                    let key = Envelope::new(schema, encoded.clone()).key()?;
                    *payload = encoded;
                    d.target = DynamicRef::new(schema, key);
                    *dirty = true;
                }
            }
        }

        if *dirty {
            let (key, bytes) = Envelope::new(d.target.schema, payload.clone()).encode_with_key()?;
            self.check_size(&key, bytes.len())?;
            staged.push((key, bytes));
        }
        Ok(())
    }
}

/// A mutable working session over one [`Root`].
///
/// Reads go through the write buffer, then the read cache, then a read-only
/// store transaction. Mutations stage objects in the write buffer and
/// rewire positions in the root's [`References`]. [`Pack::save`] commits
/// everything plus a new root envelope in one transaction.
///
/// A pack is single-writer; every method that touches state takes
/// `&mut self`.
pub struct Pack {
    root: Root,
    loader: Loader,
}

impl Pack {
    pub(crate) fn new(shared: Arc<Shared>, root: Root, flags: Flags) -> Self {
        Self {
            root,
            loader: Loader {
                shared,
                flags,
                unsaved: HashMap::new(),
                cache: HashMap::new(),
            },
        }
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn flags(&self) -> Flags {
        self.loader.flags
    }

    pub fn registry(&self) -> &Registry {
        self.loader.registry()
    }

    pub fn is_view_only(&self) -> bool {
        self.loader.flags.contains(Flags::VIEW_ONLY)
    }

    fn check_writable(&self) -> PackResult<()> {
        if self.is_view_only() {
            return Err(PackError::ViewOnlyTree);
        }
        Ok(())
    }

    /// Unsaved changes exist: staged objects, or modified references.
    pub fn is_modified(&self) -> bool {
        !self.loader.unsaved.is_empty() || self.root.refs.is_modified()
    }

    /// Number of objects in the write buffer.
    pub fn unsaved_len(&self) -> usize {
        self.loader.unsaved.len()
    }

    // ---- Objects ----

    /// Raw bytes stored under `hash`.
    pub fn get(&mut self, hash: &Hash) -> PackResult<&[u8]> {
        self.loader.get(hash)
    }

    /// The envelope stored under `hash`.
    pub fn envelope(&mut self, hash: &Hash) -> PackResult<Envelope> {
        self.loader.envelope(hash)
    }

    /// Stage encoded bytes under their content key. No store I/O.
    pub fn add(&mut self, bytes: Vec<u8>) -> PackResult<Hash> {
        self.check_writable()?;
        let hash = Envelope::key_of(&bytes);
        self.loader.check_size(&hash, bytes.len())?;
        self.loader.unsaved.insert(hash, bytes);
        Ok(hash)
    }

    /// Stage encoded bytes under `hash`, which must be their content key.
    pub fn set(&mut self, hash: Hash, bytes: Vec<u8>) -> PackResult<()> {
        self.check_writable()?;
        let actual = Envelope::key_of(&bytes);
        if actual != hash {
            return Err(PackError::HashMismatch {
                expected: hash,
                actual,
            });
        }
        self.loader.check_size(&hash, bytes.len())?;
        self.loader.unsaved.insert(hash, bytes);
        Ok(())
    }

    // ---- Resolution ----

    /// Materialize `d` (and, with `ENTIRE_MERKLE_TREES`, everything below
    /// it). Already resolved references cost no I/O.
    pub fn resolve(&mut self, d: &mut Dynamic) -> PackResult<()> {
        self.loader.resolve(d)
    }

    /// Resolve a plain reference to its envelope.
    pub fn resolve_reference(&mut self, r: &mut Reference) -> PackResult<()> {
        r.value(self).map(|_| ())
    }

    pub(crate) fn resolve_all(&mut self) -> PackResult<()> {
        for item in self.root.refs.iter_mut() {
            self.loader.resolve(item)?;
        }
        Ok(())
    }

    /// Top-level references. With `ENTIRE_TREE` every entry is resolved
    /// first.
    pub fn refs(&mut self) -> PackResult<&References> {
        if self.loader.flags.contains(Flags::ENTIRE_TREE) {
            self.resolve_all()?;
        }
        Ok(&self.root.refs)
    }

    /// The top-level reference at `index`, resolved. Other entries are left
    /// as they are.
    pub fn ref_by_index(&mut self, index: usize) -> PackResult<&Dynamic> {
        let item = self.root.refs.slot_mut(index)?;
        self.loader.resolve(item)?;
        Ok(item)
    }

    /// The record at `index`. `None` for a blank entry; `RawMode` without
    /// `NATIVE`.
    pub fn value_at(&mut self, index: usize) -> PackResult<Option<&Record>> {
        let native = self.loader.flags.contains(Flags::NATIVE);
        let item = self.ref_by_index(index)?;
        if item.is_blank() {
            return Ok(None);
        }
        if !native {
            return Err(PackError::RawMode);
        }
        Ok(item.cached())
    }

    /// Position of the first top-level entry pointing at `hash`.
    pub fn find(&self, hash: &Hash) -> Option<usize> {
        self.root.refs.position_of(hash)
    }

    // ---- Handles ----

    /// A detached dynamic for `record`; its envelope is staged now.
    pub fn dynamic(&mut self, record: Record) -> PackResult<Dynamic> {
        self.check_writable()?;
        let (dynamic, bytes) = self.loader.encode(record)?;
        self.loader.stage(&dynamic, bytes);
        Ok(dynamic)
    }

    /// A detached dynamic for an already-encoded payload. Works without
    /// `NATIVE`; with it the payload is validated against the schema.
    pub fn dynamic_raw(&mut self, schema: Hash, payload: Vec<u8>) -> PackResult<Dynamic> {
        self.check_writable()?;
        let record = if self.loader.flags.contains(Flags::NATIVE) {
            Some(self.loader.registry().decode(&schema, &payload)?)
        } else {
            None
        };
        let (dynamic, bytes) = self.loader.wrap(schema, payload, record)?;
        self.loader.stage(&dynamic, bytes);
        Ok(dynamic)
    }

    /// A resolved plain reference to `record`'s envelope, staged now.
    pub fn reference(&mut self, record: Record) -> PackResult<Reference> {
        self.check_writable()?;
        let (dynamic, bytes) = self.loader.encode(record)?;
        let envelope = decode_envelope(dynamic.hash(), &bytes)?;
        self.loader.stage(&dynamic, bytes);
        Ok(Reference::resolved(dynamic.hash(), envelope))
    }

    /// A new collection holding `records`, each staged now.
    pub fn references(
        &mut self,
        records: impl IntoIterator<Item = Record>,
    ) -> PackResult<References> {
        self.check_writable()?;
        let built = self.build(records)?;
        let mut refs = References::new(
            self.loader.shared.next_collection(),
            self.loader.flags.contains(Flags::HASH_TABLE_INDEX),
        );
        refs.extend(built);
        Ok(refs)
    }

    /// Encode every record, then stage them all; nothing is staged if any
    /// record fails.
    fn build(&mut self, records: impl IntoIterator<Item = Record>) -> PackResult<Vec<Dynamic>> {
        let encoded = records
            .into_iter()
            .map(|r| self.loader.encode(r))
            .collect::<PackResult<Vec<_>>>()?;
        Ok(encoded
            .into_iter()
            .map(|(dynamic, bytes)| {
                self.loader.stage(&dynamic, bytes);
                dynamic
            })
            .collect())
    }

    // ---- Mutation ----

    /// Append records to the root; every entry is re-attached afterwards.
    pub fn append(&mut self, records: impl IntoIterator<Item = Record>) -> PackResult<()> {
        self.check_writable()?;
        let built = self.build(records)?;
        self.root.refs.extend(built);
        Ok(())
    }

    /// Append existing references to the root.
    pub fn append_refs(&mut self, items: impl IntoIterator<Item = Dynamic>) -> PackResult<()> {
        self.check_writable()?;
        self.root.refs.extend(items);
        Ok(())
    }

    /// Remove the last entry, resolved and detached. `None` on an empty root.
    pub fn pop(&mut self) -> PackResult<Option<Dynamic>> {
        self.check_writable()?;
        let Some(last) = self.root.refs.len().checked_sub(1) else {
            return Ok(None);
        };
        self.loader.resolve(self.root.refs.slot_mut(last)?)?;
        Ok(self.root.refs.pop())
    }

    /// Swap entry `index` for `record`, returning the old entry detached.
    pub fn replace(&mut self, index: usize, record: Record) -> PackResult<Dynamic> {
        self.check_writable()?;
        self.root.refs.get(index)?;
        let (dynamic, bytes) = self.loader.encode(record)?;
        self.loader.stage(&dynamic, bytes);
        self.root.refs.replace(index, dynamic)
    }

    /// Swap entry `index` for an existing reference.
    pub fn replace_ref(&mut self, index: usize, item: Dynamic) -> PackResult<Dynamic> {
        self.check_writable()?;
        self.root.refs.replace(index, item)
    }

    /// Re-point entry `index` at `record`. Written at the next save.
    pub fn set_value(&mut self, index: usize, record: Record) -> PackResult<()> {
        self.check_writable()?;
        self.root
            .refs
            .set_value(index, &self.loader.shared.registry, record)
    }

    /// Mutable access to the top-level collection, e.g. to edit nested
    /// children of resolved entries.
    pub fn refs_mut(&mut self) -> PackResult<&mut References> {
        self.check_writable()?;
        Ok(&mut self.root.refs)
    }

    // ---- Save ----

    /// Commit the write buffer, every dirty object and a new root in one
    /// transaction.
    ///
    /// On success the new root has `seq + 1`, a timestamp no earlier than
    /// the previous one, and `prev` set to the previous root's hash. On
    /// failure the pack is left exactly as it was.
    pub fn save(&mut self) -> PackResult<RootPack> {
        self.check_writable()?;
        self.loader.shared.check_open()?;

        let mut refs = self.root.refs.clone();
        let mut staged = Vec::new();
        for item in refs.iter_mut() {
            self.loader.flush(item, &mut staged)?;
        }
        refs.reattach();

        let wire = RootWire {
            feed: self.root.feed,
            seq: self.root.seq + 1,
            time: Timestamp::after(self.root.time),
            prev: self.root.hash,
            refs: refs.targets(),
        };
        let (hash, data) = wire.to_envelope()?.encode_with_key()?;
        self.loader.check_size(&hash, data.len())?;

        let mut batch = Batch::new();
        for (key, bytes) in self.loader.unsaved.iter().chain(staged.iter().map(|(k, b)| (k, b))) {
            batch.object(*key, bytes.clone());
        }
        batch.object(hash, data.clone()).root(RootEntry {
            feed: wire.feed,
            seq: wire.seq,
            hash,
        });
        self.loader.shared.store.commit(&batch)?;

        let objects = batch.object_count();
        self.loader.cache.extend(self.loader.unsaved.drain());
        self.loader.cache.extend(staged);
        self.loader.cache.insert(hash, data.clone());
        refs.mark_saved();
        self.root = Root {
            feed: wire.feed,
            seq: wire.seq,
            time: wire.time,
            prev: wire.prev,
            hash,
            refs,
        };
        info!(
            feed = %wire.feed.short_hex(),
            seq = wire.seq,
            root = %hash.short_hex(),
            objects,
            "root saved"
        );

        Ok(RootPack {
            hash,
            feed: wire.feed,
            seq: wire.seq,
            time: wire.time,
            prev: wire.prev,
            data,
        })
    }
}

impl std::fmt::Debug for Pack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pack")
            .field("feed", &self.root.feed)
            .field("seq", &self.root.seq)
            .field("refs", &self.root.refs.len())
            .field("unsaved", &self.loader.unsaved.len())
            .field("flags", &self.loader.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::config::ContainerConfig;
    use crate::container::Container;
    use knot_registry::{Field, Kind, RegistryError, Value};
    use knot_store::{
        Bucket, KvBackend, MemoryBackend, ReadTx, StoreError, StoreResult, WriteTx,
    };

    /// Memory backend whose transactions can be made to fail after all
    /// writes were issued.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail: AtomicBool,
    }

    impl KvBackend for FlakyBackend {
        fn view(&self, f: &mut dyn FnMut(&dyn ReadTx) -> StoreResult<()>) -> StoreResult<()> {
            self.inner.view(f)
        }

        fn update(
            &self,
            f: &mut dyn FnMut(&mut dyn WriteTx) -> StoreResult<()>,
        ) -> StoreResult<()> {
            let fail = self.fail.load(Ordering::SeqCst);
            self.inner.update(&mut |tx| {
                f(tx)?;
                if fail {
                    return Err(StoreError::Backend("injected failure".into()));
                }
                Ok(())
            })
        }
    }

    fn registry() -> Arc<Registry> {
        let registry = Registry::new();
        registry
            .register("test.Note", vec![Field::new("text", Kind::Str)])
            .unwrap();
        registry
            .register(
                "test.Branch",
                vec![
                    Field::new("label", Kind::Str),
                    Field::new("child", Kind::Dynamic),
                ],
            )
            .unwrap();
        registry
            .register("test.Dir", vec![Field::new("items", Kind::References)])
            .unwrap();
        Arc::new(registry)
    }

    fn note(text: &str) -> Record {
        Record::new("test.Note").with("text", text)
    }

    fn text(record: Option<&Record>) -> Option<&str> {
        record.and_then(|r| r.get("text")).and_then(Value::as_str)
    }

    fn feed() -> Hash {
        Hash::from_bytes(b"feed")
    }

    fn setup() -> (Container, Pack) {
        let c = Container::in_memory(registry());
        let pack = c.new_root(feed(), Flags::NATIVE).unwrap();
        (c, pack)
    }

    fn positions(pack: &Pack) -> Vec<usize> {
        pack.root()
            .refs()
            .iter()
            .map(|d| d.position().unwrap().index)
            .collect()
    }

    // ---- Objects ----

    #[test]
    fn add_then_get_without_store_io() {
        let (c, mut pack) = setup();
        let hash = pack.add(b"raw".to_vec()).unwrap();
        assert_eq!(pack.get(&hash).unwrap(), b"raw");
        assert_eq!(pack.unsaved_len(), 1);
        assert!(!c.store().contains(&hash).unwrap());
    }

    #[test]
    fn get_reads_through_store() {
        let (c, mut pack) = setup();
        let hash = c.store().put(b"stored").unwrap();
        assert_eq!(pack.get(&hash).unwrap(), b"stored");
        let missing = Hash::from_bytes(b"missing");
        assert!(matches!(pack.get(&missing), Err(PackError::NotFound(h)) if h == missing));
    }

    #[test]
    fn set_checks_content_key() {
        let (_c, mut pack) = setup();
        let bytes = b"payload".to_vec();
        pack.set(Envelope::key_of(&bytes), bytes.clone()).unwrap();
        assert!(matches!(
            pack.set(Hash::from_bytes(b"wrong"), bytes),
            Err(PackError::HashMismatch { .. })
        ));
    }

    #[test]
    fn object_too_large_carries_hash() {
        let config = ContainerConfig {
            max_object_size: 8,
            ..ContainerConfig::default()
        };
        let c = Container::new(Arc::new(MemoryBackend::new()), registry(), config);
        let mut pack = c.new_root(feed(), Flags::NATIVE).unwrap();
        let bytes = vec![0u8; 9];
        let expected = Envelope::key_of(&bytes);
        assert!(matches!(
            pack.add(bytes),
            Err(PackError::ObjectTooLarge { hash, size: 9, max: 8 }) if hash == expected
        ));
        assert!(matches!(
            pack.append([note("far too long for eight bytes")]),
            Err(PackError::ObjectTooLarge { .. })
        ));
        assert_eq!(pack.unsaved_len(), 0);
    }

    // ---- Scenario and save ----

    #[test]
    fn append_save_scenario() {
        let (c, mut pack) = setup();
        let before = pack.root().seq();
        pack.append([note("x")]).unwrap();
        let saved = pack.save().unwrap();

        assert_eq!(saved.seq, before + 1);
        assert_eq!(pack.root().seq(), before + 1);
        assert_eq!(pack.root().hash(), saved.hash);
        let refs = pack.refs().unwrap();
        assert_eq!(refs.len(), 1);
        let hash = refs.get(0).unwrap().hash();
        assert!(c.store().get(&hash).is_ok());
        assert!(c.store().contains(&saved.hash).unwrap());
        assert_eq!(text(pack.value_at(0).unwrap()), Some("x"));
        assert!(!pack.is_modified());
        assert_eq!(pack.unsaved_len(), 0);
    }

    #[test]
    fn seq_grows_by_one_per_save() {
        let (_c, mut pack) = setup();
        let s0 = pack.root().seq();
        let mut last_time = pack.root().time();
        for _ in 0..5 {
            let saved = pack.save().unwrap();
            assert!(saved.time >= last_time);
            last_time = saved.time;
        }
        assert_eq!(pack.root().seq(), s0 + 5);
    }

    #[test]
    fn failed_save_leaves_pack_untouched() {
        let backend = Arc::new(FlakyBackend::default());
        let c = Container::new(backend.clone(), registry(), ContainerConfig::default());
        let mut pack = c.new_root(feed(), Flags::NATIVE).unwrap();
        pack.append([note("a"), note("b")]).unwrap();
        let extra = pack.add(b"extra".to_vec()).unwrap();
        pack.set_value(0, note("a2")).unwrap();

        let unsaved = pack.unsaved_len();
        let targets = pack.root().refs().targets();
        backend.fail.store(true, Ordering::SeqCst);
        assert!(matches!(pack.save(), Err(PackError::Store(StoreError::Backend(_)))));

        assert_eq!(pack.unsaved_len(), unsaved);
        assert_eq!(pack.root().seq(), 0);
        assert!(!pack.root().is_saved());
        assert_eq!(pack.root().refs().targets(), targets);
        assert!(pack.root().refs().get(0).unwrap().is_dirty());
        assert!(pack.is_modified());
        assert!(backend.inner.is_empty());

        backend.fail.store(false, Ordering::SeqCst);
        let saved = pack.save().unwrap();
        assert_eq!(saved.seq, 1);
        assert!(c.store().contains(&extra).unwrap());
        for target in targets {
            assert!(c.store().contains(&target.object).unwrap());
        }
        assert_eq!(backend.inner.len(Bucket::Roots), 1);
    }

    #[test]
    fn concurrent_saves_of_same_seq_conflict() {
        let (c, mut pack) = setup();
        let base = pack.save().unwrap();
        let mut a = c.unpack(&base.hash, Flags::NATIVE).unwrap();
        let mut b = c.unpack(&base.hash, Flags::NATIVE).unwrap();
        a.append([note("a")]).unwrap();
        b.append([note("b")]).unwrap();
        a.save().unwrap();
        assert!(matches!(
            b.save(),
            Err(PackError::Store(StoreError::RootConflict { seq: 2, .. }))
        ));
        assert_eq!(b.root().seq(), 1);
        assert!(b.is_modified());
    }

    // ---- Reference model ----

    #[test]
    fn append_then_pop_reattaches() {
        let (_c, mut pack) = setup();
        pack.append([note("a"), note("b"), note("c")]).unwrap();
        assert_eq!(positions(&pack), vec![0, 1, 2]);

        let popped = pack.pop().unwrap().unwrap();
        assert!(!popped.is_attached());
        assert!(popped.is_resolved());
        assert_eq!(text(popped.cached()), Some("c"));
        assert_eq!(positions(&pack), vec![0, 1]);
    }

    #[test]
    fn pop_resolves_stored_entry() {
        let (c, mut pack) = setup();
        pack.append([note("a"), note("b")]).unwrap();
        let saved = pack.save().unwrap();

        let mut reopened = c.unpack(&saved.hash, Flags::NATIVE).unwrap();
        let popped = reopened.pop().unwrap().unwrap();
        assert!(popped.is_resolved());
        assert_eq!(text(popped.cached()), Some("b"));
        assert_eq!(reopened.save().unwrap().seq, 2);
        assert_eq!(reopened.root().len(), 1);
    }

    #[test]
    fn pop_empty_root_is_none() {
        let (_c, mut pack) = setup();
        assert!(pack.pop().unwrap().is_none());
    }

    #[test]
    fn replace_returns_detached_old() {
        let (_c, mut pack) = setup();
        pack.append([note("a"), note("b")]).unwrap();
        let old = pack.replace(1, note("z")).unwrap();
        assert!(!old.is_attached());
        assert_eq!(text(old.cached()), Some("b"));
        assert_eq!(text(pack.value_at(1).unwrap()), Some("z"));
        assert_eq!(positions(&pack), vec![0, 1]);
        assert!(matches!(
            pack.replace(5, note("q")),
            Err(PackError::IndexOutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn ref_by_index_out_of_range() {
        let (_c, mut pack) = setup();
        pack.append([note("a")]).unwrap();
        assert!(matches!(
            pack.ref_by_index(1),
            Err(PackError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn lazy_resolution_touches_one_entry() {
        let (c, mut pack) = setup();
        pack.append([note("a"), note("b")]).unwrap();
        let saved = pack.save().unwrap();

        let mut lazy = c.unpack(&saved.hash, Flags::NATIVE).unwrap();
        assert!(lazy.ref_by_index(0).unwrap().is_resolved());
        assert!(!lazy.root().refs().get(1).unwrap().is_resolved());
        assert!(!lazy.refs().unwrap().get(1).unwrap().is_resolved());
    }

    #[test]
    fn entire_tree_resolves_everything() {
        let (c, mut pack) = setup();
        pack.append([note("a"), note("b"), note("c")]).unwrap();
        let saved = pack.save().unwrap();

        let mut eager = c
            .unpack(&saved.hash, Flags::NATIVE | Flags::ENTIRE_TREE)
            .unwrap();
        assert!(eager.root().refs().iter().all(Dynamic::is_resolved));
        assert!(eager.refs().unwrap().iter().all(Dynamic::is_resolved));
    }

    #[test]
    fn entire_tree_fails_on_missing_object() {
        let (c, mut pack) = setup();
        let dangling = Dynamic::new(DynamicRef::new(
            c.registry().schema_id("test.Note").unwrap(),
            Hash::from_bytes(b"dangling"),
        ));
        pack.append_refs([dangling]).unwrap();
        let saved = pack.save().unwrap();

        assert!(c.unpack(&saved.hash, Flags::NATIVE).is_ok());
        assert!(matches!(
            c.unpack(&saved.hash, Flags::NATIVE | Flags::ENTIRE_TREE),
            Err(PackError::NotFound(_))
        ));
    }

    #[test]
    fn find_with_and_without_index() {
        for flags in [Flags::NATIVE, Flags::NATIVE | Flags::HASH_TABLE_INDEX] {
            let c = Container::in_memory(registry());
            let mut pack = c.new_root(feed(), flags).unwrap();
            pack.append([note("a"), note("b"), note("a")]).unwrap();
            let a = pack.root().refs().get(0).unwrap().hash();
            let b = pack.root().refs().get(1).unwrap().hash();
            assert_eq!(pack.find(&a), Some(0));
            assert_eq!(pack.find(&b), Some(1));
            pack.pop().unwrap();
            pack.replace(0, note("c")).unwrap();
            assert_eq!(pack.find(&a), None);
            assert_eq!(pack.find(&Hash::from_bytes(b"none")), None);
        }
    }

    #[test]
    fn set_value_is_written_at_save() {
        let (c, mut pack) = setup();
        pack.append([note("old")]).unwrap();
        pack.save().unwrap();

        pack.set_value(0, note("new")).unwrap();
        assert!(pack.is_modified());
        let target = pack.root().refs().get(0).unwrap().hash();
        assert!(!c.store().contains(&target).unwrap());

        let saved = pack.save().unwrap();
        assert!(c.store().contains(&target).unwrap());
        let mut reopened = c.unpack(&saved.hash, Flags::NATIVE).unwrap();
        assert_eq!(text(reopened.value_at(0).unwrap()), Some("new"));
    }

    #[test]
    fn dynamic_value_resolves_once() {
        let (c, mut pack) = setup();
        pack.append([note("a")]).unwrap();
        let saved = pack.save().unwrap();
        let target = pack.root().refs().get(0).unwrap().target();

        let mut other = c.unpack(&saved.hash, Flags::NATIVE).unwrap();
        let mut d = Dynamic::new(target);
        assert_eq!(text(d.value(&mut other).unwrap()), Some("a"));
        assert!(d.is_resolved());
        assert_eq!(text(d.value(&mut other).unwrap()), Some("a"));

        assert!(Dynamic::blank().value(&mut other).unwrap().is_none());
    }

    #[test]
    fn corrupt_object_surfaces_as_decode() {
        let (c, mut pack) = setup();
        let key = c.store().put(b"not an envelope").unwrap();
        let schema = c.registry().schema_id("test.Note").unwrap();
        let mut d = Dynamic::new(DynamicRef::new(schema, key));
        assert!(matches!(pack.resolve(&mut d), Err(PackError::Decode { .. })));

        let wrong = pack.add(Envelope::new(schema, vec![1, 2, 3]).encode().unwrap()).unwrap();
        let mut d = Dynamic::new(DynamicRef::new(schema, wrong));
        assert!(matches!(pack.resolve(&mut d), Err(PackError::Registry(_))));
    }

    #[test]
    fn schema_mismatch_is_decode_error() {
        let (_c, mut pack) = setup();
        let d = pack.dynamic(note("a")).unwrap();
        let mut wrong = Dynamic::new(DynamicRef::new(Hash::from_bytes(b"other"), d.hash()));
        assert!(matches!(
            pack.resolve(&mut wrong),
            Err(PackError::Decode { .. })
        ));
    }

    #[test]
    fn plain_reference_resolves_to_envelope() {
        let (c, mut pack) = setup();
        let r = pack.reference(note("r")).unwrap();
        assert!(r.is_resolved());
        pack.save().unwrap();

        let mut other = c.new_root(feed(), Flags::NATIVE).unwrap();
        let mut fresh = Reference::new(r.hash());
        let envelope = fresh.value(&mut other).unwrap().unwrap().clone();
        assert_eq!(Some(&envelope), r.cached());
        assert_eq!(envelope.schema, c.registry().schema_id("test.Note").unwrap());
        assert!(Reference::default().value(&mut other).unwrap().is_none());
    }

    #[test]
    fn references_builder_stages_everything() {
        let (_c, mut pack) = setup();
        let refs = pack.references([note("a"), note("b")]).unwrap();
        assert_eq!(refs.len(), 2);
        assert_ne!(refs.id(), pack.root().refs().id());
        assert_eq!(pack.unsaved_len(), 2);
        assert!(refs.iter().all(|d| d.is_attached()));
    }

    #[test]
    fn failed_build_stages_nothing() {
        let (_c, mut pack) = setup();
        let err = pack
            .append([note("ok"), Record::new("test.Unknown")])
            .unwrap_err();
        assert!(matches!(err, PackError::Registry(_)));
        assert_eq!(pack.unsaved_len(), 0);
        assert!(pack.root().is_empty());
    }

    // ---- Modes ----

    #[test]
    fn view_only_forbids_mutation_and_save() {
        let (c, mut pack) = setup();
        pack.append([note("a")]).unwrap();
        let saved = pack.save().unwrap();
        let objects = c.store().len().unwrap();

        let mut view = c
            .unpack(&saved.hash, Flags::NATIVE | Flags::VIEW_ONLY)
            .unwrap();
        assert!(view.is_view_only());
        assert_eq!(text(view.value_at(0).unwrap()), Some("a"));
        assert!(matches!(view.save(), Err(PackError::ViewOnlyTree)));
        assert!(matches!(view.append([note("b")]), Err(PackError::ViewOnlyTree)));
        assert!(matches!(view.pop(), Err(PackError::ViewOnlyTree)));
        assert!(matches!(view.replace(0, note("c")), Err(PackError::ViewOnlyTree)));
        assert!(matches!(view.set_value(0, note("c")), Err(PackError::ViewOnlyTree)));
        assert!(matches!(view.add(vec![1]), Err(PackError::ViewOnlyTree)));
        assert_eq!(c.store().len().unwrap(), objects);
        assert_eq!(c.roots(&feed()).unwrap().len(), 1);
    }

    #[test]
    fn raw_mode_skips_registry() {
        let (c, mut pack) = setup();
        pack.append([note("a")]).unwrap();
        let saved = pack.save().unwrap();

        let mut raw = c.unpack(&saved.hash, Flags::empty()).unwrap();
        assert!(matches!(raw.value_at(0), Err(PackError::RawMode)));
        assert!(raw.ref_by_index(0).unwrap().cached_payload().is_some());
        assert!(matches!(raw.append([note("b")]), Err(PackError::RawMode)));

        let schema = c.registry().schema_id("test.Note").unwrap();
        let (_, payload) = c.registry().encode(&note("raw")).unwrap();
        let d = raw.dynamic_raw(schema, payload.clone()).unwrap();
        assert!(d.cached().is_none());
        raw.append_refs([d]).unwrap();
        let saved = raw.save().unwrap();

        let mut native = c.unpack(&saved.hash, Flags::NATIVE).unwrap();
        assert_eq!(text(native.value_at(1).unwrap()), Some("raw"));
    }

    // ---- Nested trees ----

    fn branch(label: &str, child: DynamicRef) -> Record {
        Record::new("test.Branch")
            .with("label", label)
            .with("child", child)
    }

    #[test]
    fn entire_merkle_trees_resolves_children() {
        let (c, mut pack) = setup();
        let leaf = pack.dynamic(note("leaf")).unwrap();
        pack.append([branch("b", leaf.target())]).unwrap();
        let saved = pack.save().unwrap();

        let mut shallow = c.unpack(&saved.hash, Flags::NATIVE).unwrap();
        assert!(shallow.ref_by_index(0).unwrap().children().is_none());

        let mut deep = c
            .unpack(&saved.hash, Flags::NATIVE | Flags::ENTIRE_MERKLE_TREES)
            .unwrap();
        let top = deep.ref_by_index(0).unwrap();
        let children = top.children().unwrap();
        assert_eq!(children.len(), 1);
        let child = children.get(0).unwrap();
        assert!(child.is_resolved());
        assert_eq!(child.target(), leaf.target());
        assert_eq!(text(child.cached()), Some("leaf"));
    }

    #[test]
    fn changed_child_reencodes_parent() {
        let registry = registry();
        let c = Container::in_memory(registry.clone());
        let mut pack = c.new_root(feed(), Flags::NATIVE).unwrap();
        let leaf = pack.dynamic(note("v1")).unwrap();
        pack.append([branch("b", leaf.target())]).unwrap();
        let first = pack.save().unwrap();
        let old_parent = pack.root().refs().get(0).unwrap().hash();

        let mut deep = c
            .unpack(&first.hash, Flags::NATIVE | Flags::ENTIRE_MERKLE_TREES)
            .unwrap();
        deep.ref_by_index(0).unwrap();
        deep.refs_mut()
            .unwrap()
            .get_mut(0)
            .unwrap()
            .children_mut()
            .unwrap()
            .set_value(0, &registry, note("v2"))
            .unwrap();
        assert!(deep.is_modified());
        let second = deep.save().unwrap();

        let new_parent = deep.root().refs().get(0).unwrap().hash();
        assert_ne!(new_parent, old_parent);
        assert!(!deep.is_modified());

        let mut check = c
            .unpack(&second.hash, Flags::NATIVE | Flags::ENTIRE_MERKLE_TREES)
            .unwrap();
        let top = check.ref_by_index(0).unwrap();
        let child = top.children().unwrap().get(0).unwrap();
        assert_eq!(text(child.cached()), Some("v2"));
        assert_eq!(
            top.cached().and_then(|r| r.get("label")).and_then(Value::as_str),
            Some("b")
        );
    }

    fn dir(items: Vec<DynamicRef>) -> Record {
        Record::new("test.Dir").with("items", Value::References(items))
    }

    fn child_texts(pack: &mut Pack) -> Vec<String> {
        pack.ref_by_index(0)
            .unwrap()
            .children()
            .unwrap()
            .iter()
            .map(|d| text(d.cached()).unwrap().to_string())
            .collect()
    }

    #[test]
    fn nested_push_and_pop_are_saved() {
        let deep_flags = Flags::NATIVE | Flags::ENTIRE_MERKLE_TREES;
        let (c, mut pack) = setup();
        let a = pack.dynamic(note("a")).unwrap();
        pack.append([dir(vec![a.target()])]).unwrap();
        let first = pack.save().unwrap();

        let mut deep = c.unpack(&first.hash, deep_flags).unwrap();
        deep.ref_by_index(0).unwrap();
        let b = deep.dynamic(note("b")).unwrap();
        deep.refs_mut()
            .unwrap()
            .get_mut(0)
            .unwrap()
            .children_mut()
            .unwrap()
            .push(b);
        assert!(deep.is_modified());
        let second = deep.save().unwrap();
        assert!(!deep.is_modified());

        let mut check = c.unpack(&second.hash, deep_flags).unwrap();
        assert_eq!(child_texts(&mut check), vec!["a", "b"]);
        let stored = check
            .value_at(0)
            .unwrap()
            .and_then(|r| r.get("items"))
            .and_then(Value::as_references)
            .map(<[DynamicRef]>::len);
        assert_eq!(stored, Some(2));

        let popped = check
            .refs_mut()
            .unwrap()
            .get_mut(0)
            .unwrap()
            .children_mut()
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(text(popped.cached()), Some("b"));
        let third = check.save().unwrap();

        let mut last = c.unpack(&third.hash, deep_flags).unwrap();
        assert_eq!(child_texts(&mut last), vec!["a"]);
    }

    #[test]
    fn dropping_a_single_child_slot_fails_save() {
        let (c, mut pack) = setup();
        let leaf = pack.dynamic(note("leaf")).unwrap();
        pack.append([branch("b", leaf.target())]).unwrap();
        let first = pack.save().unwrap();

        let mut deep = c
            .unpack(&first.hash, Flags::NATIVE | Flags::ENTIRE_MERKLE_TREES)
            .unwrap();
        deep.ref_by_index(0).unwrap();
        deep.refs_mut()
            .unwrap()
            .get_mut(0)
            .unwrap()
            .children_mut()
            .unwrap()
            .pop()
            .unwrap();

        assert!(matches!(
            deep.save(),
            Err(PackError::Registry(RegistryError::FieldMismatch { .. }))
        ));
        assert_eq!(deep.root().seq(), 1);
        assert!(deep.is_modified());
        assert_eq!(c.roots(&feed()).unwrap().len(), 1);
    }

    #[test]
    fn indexed_find_follows_in_place_retarget() {
        let registry = registry();
        let c = Container::in_memory(registry.clone());
        let mut pack = c
            .new_root(feed(), Flags::NATIVE | Flags::HASH_TABLE_INDEX)
            .unwrap();
        pack.append([note("a")]).unwrap();
        let old = pack.root().refs().get(0).unwrap().hash();

        pack.refs_mut()
            .unwrap()
            .get_mut(0)
            .unwrap()
            .set_value(&registry, note("z"))
            .unwrap();
        let new = pack.root().refs().get(0).unwrap().hash();

        assert_ne!(old, new);
        assert_eq!(pack.find(&new), Some(0));
        assert_eq!(pack.find(&old), None);
    }

    #[test]
    fn tampered_object_is_decode_error() {
        let (c, mut pack) = setup();
        pack.append([note("a")]).unwrap();
        let saved = pack.save().unwrap();
        let key = pack.root().refs().get(0).unwrap().hash();
        c.store()
            .backend()
            .update(&mut |tx| {
                tx.put(Bucket::Objects, key.as_bytes(), b"tampered");
                Ok(())
            })
            .unwrap();

        let mut other = c.unpack(&saved.hash, Flags::NATIVE).unwrap();
        assert!(matches!(
            other.value_at(0),
            Err(PackError::Decode { hash, .. }) if hash == key
        ));
    }
}
