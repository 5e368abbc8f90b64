use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use knot_registry::{Registry, RegistryError};
use knot_store::{ContentStore, KvBackend, MemoryBackend, RootEntry};
use knot_types::Hash;
use tracing::{debug, info};

use crate::config::ContainerConfig;
use crate::error::{PackError, PackResult};
use crate::flags::Flags;
use crate::pack::Pack;
use crate::reference::CollectionId;
use crate::root::{Root, RootPack, RootWire};
use crate::references::References;

/// State shared by a container and every pack it opened.
pub(crate) struct Shared {
    pub(crate) store: ContentStore,
    pub(crate) registry: Arc<Registry>,
    pub(crate) config: ContainerConfig,
    closed: AtomicBool,
    next_collection: AtomicU64,
}

impl Shared {
    pub(crate) fn check_open(&self) -> PackResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PackError::Terminated);
        }
        Ok(())
    }

    pub(crate) fn next_collection(&self) -> CollectionId {
        self.next_collection.fetch_add(1, Ordering::Relaxed)
    }
}

/// Owner of a content store, a type registry, and their configuration.
///
/// Cloning a `Container` is cheap; clones share the same store, registry
/// and open/closed state. Packs opened from a container keep a handle to
/// that shared state, so closing the container terminates them too.
#[derive(Clone)]
pub struct Container {
    inner: Arc<Shared>,
}

impl Container {
    /// Create a container over `backend`.
    pub fn new(backend: Arc<dyn KvBackend>, registry: Arc<Registry>, config: ContainerConfig) -> Self {
        info!(
            types = registry.len(),
            max_object_size = config.max_object_size,
            "container opened"
        );
        Self {
            inner: Arc::new(Shared {
                store: ContentStore::new(backend),
                registry,
                config,
                closed: AtomicBool::new(false),
                next_collection: AtomicU64::new(1),
            }),
        }
    }

    /// A container over a fresh in-memory backend with default settings.
    pub fn in_memory(registry: Arc<Registry>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), registry, ContainerConfig::default())
    }

    pub fn store(&self) -> &ContentStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// Flags configured as the default for new packs.
    pub fn default_flags(&self) -> Flags {
        self.inner.config.default_flags
    }

    /// Start a new, empty root for `feed`. Its first save gets seq 1.
    pub fn new_root(&self, feed: Hash, flags: Flags) -> PackResult<Pack> {
        self.inner.check_open()?;
        let refs = References::new(
            self.inner.next_collection(),
            flags.contains(Flags::HASH_TABLE_INDEX),
        );
        debug!(feed = %feed.short_hex(), "new root");
        Ok(Pack::new(self.inner.clone(), Root::empty(feed, refs), flags))
    }

    /// Open a pack over the saved root `hash`.
    ///
    /// With `ENTIRE_TREE` every top-level reference is resolved before
    /// returning.
    pub fn unpack(&self, hash: &Hash, flags: Flags) -> PackResult<Pack> {
        self.inner.check_open()?;
        let envelope = self.inner.store.get(hash)?;
        let wire = RootWire::from_envelope(*hash, &envelope)?;
        let root = Root::from_wire(
            *hash,
            wire,
            self.inner.next_collection(),
            flags.contains(Flags::HASH_TABLE_INDEX),
        );
        debug!(
            root = %hash.short_hex(),
            seq = root.seq(),
            refs = root.len(),
            "unpacking root"
        );
        let mut pack = Pack::new(self.inner.clone(), root, flags);
        if flags.contains(Flags::ENTIRE_TREE) {
            pack.resolve_all()?;
        }
        Ok(pack)
    }

    /// Open the latest saved root of `feed`, if any.
    pub fn open_last(&self, feed: &Hash, flags: Flags) -> PackResult<Option<Pack>> {
        match self.last_root(feed)? {
            Some(entry) => self.unpack(&entry.hash, flags).map(Some),
            None => Ok(None),
        }
    }

    pub fn last_root(&self, feed: &Hash) -> PackResult<Option<RootEntry>> {
        Ok(self.inner.store.last_root(feed)?)
    }

    /// Every saved root of `feed`, ascending by seq.
    pub fn roots(&self, feed: &Hash) -> PackResult<Vec<RootEntry>> {
        Ok(self.inner.store.roots(feed)?)
    }

    /// Every feed with at least one saved root.
    pub fn feeds(&self) -> PackResult<Vec<Hash>> {
        Ok(self.inner.store.feeds()?)
    }

    /// The publishable form of the saved root `hash`.
    pub fn root_pack(&self, hash: &Hash) -> PackResult<RootPack> {
        RootPack::decode(self.inner.store.get_raw(hash)?)
    }

    /// Persist the registry's schema catalogue.
    pub fn save_schemas(&self) -> PackResult<usize> {
        self.inner.check_open()?;
        Ok(self.inner.registry.save(&self.inner.store)?)
    }

    /// Keys of every stored object of the registered type `name`.
    pub fn find_by_type(&self, name: &str) -> PackResult<Vec<Hash>> {
        let schema = self
            .inner
            .registry
            .schema_id(name)
            .ok_or_else(|| RegistryError::UnregisteredType {
                name: name.to_string(),
            })?;
        Ok(self.inner.store.find_by_schema(&schema)?)
    }

    /// Terminate the container. Later `new_root`, `unpack` and
    /// `Pack::save` calls fail with `Terminated`.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!("container closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("store", &self.inner.store)
            .field("types", &self.inner.registry.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knot_registry::{Field, Kind, Record};
    use knot_store::FileBackend;

    fn registry() -> Arc<Registry> {
        let registry = Registry::new();
        registry
            .register("test.Note", vec![Field::new("text", Kind::Str)])
            .unwrap();
        Arc::new(registry)
    }

    fn note(text: &str) -> Record {
        Record::new("test.Note").with("text", text)
    }

    fn feed() -> Hash {
        Hash::from_bytes(b"feed")
    }

    #[test]
    fn new_root_then_unpack() {
        let c = Container::in_memory(registry());
        let mut pack = c.new_root(feed(), Flags::NATIVE).unwrap();
        pack.append([note("a"), note("b")]).unwrap();
        let saved = pack.save().unwrap();

        let mut reopened = c.unpack(&saved.hash, Flags::NATIVE).unwrap();
        assert_eq!(reopened.root().seq(), 1);
        assert_eq!(reopened.root().len(), 2);
        assert_eq!(
            reopened.value_at(1).unwrap().and_then(|r| r.get("text")).and_then(|v| v.as_str()),
            Some("b")
        );
    }

    #[test]
    fn open_last_follows_feed() {
        let c = Container::in_memory(registry());
        assert!(c.open_last(&feed(), Flags::NATIVE).unwrap().is_none());

        let mut pack = c.new_root(feed(), Flags::NATIVE).unwrap();
        pack.save().unwrap();
        pack.append([note("x")]).unwrap();
        let second = pack.save().unwrap();

        let last = c.open_last(&feed(), Flags::NATIVE).unwrap().unwrap();
        assert_eq!(last.root().hash(), second.hash);
        assert_eq!(last.root().seq(), 2);

        let roots = c.roots(&feed()).unwrap();
        assert_eq!(roots.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(c.last_root(&feed()).unwrap().unwrap().hash, second.hash);
        assert_eq!(c.feeds().unwrap(), vec![feed()]);
    }

    #[test]
    fn root_pack_links_prev() {
        let c = Container::in_memory(registry());
        let mut pack = c.new_root(feed(), Flags::NATIVE).unwrap();
        let first = pack.save().unwrap();
        let second = pack.save().unwrap();
        assert!(first.prev.is_null());
        assert_eq!(second.prev, first.hash);
        assert_eq!(c.root_pack(&second.hash).unwrap(), second);
    }

    #[test]
    fn unpack_missing_root() {
        let c = Container::in_memory(registry());
        let missing = Hash::from_bytes(b"missing");
        assert!(matches!(
            c.unpack(&missing, Flags::NATIVE),
            Err(PackError::NotFound(h)) if h == missing
        ));
    }

    #[test]
    fn unpack_non_root_object() {
        let c = Container::in_memory(registry());
        let mut pack = c.new_root(feed(), Flags::NATIVE).unwrap();
        pack.append([note("x")]).unwrap();
        pack.save().unwrap();
        let object = pack.root().refs().get(0).unwrap().hash();
        assert!(matches!(
            c.unpack(&object, Flags::NATIVE),
            Err(PackError::Decode { .. })
        ));
    }

    #[test]
    fn close_terminates() {
        let c = Container::in_memory(registry());
        let mut pack = c.new_root(feed(), Flags::NATIVE).unwrap();
        let saved = pack.save().unwrap();

        c.close();
        assert!(c.is_closed());
        assert!(matches!(
            c.new_root(feed(), Flags::NATIVE),
            Err(PackError::Terminated)
        ));
        assert!(matches!(
            c.unpack(&saved.hash, Flags::NATIVE),
            Err(PackError::Terminated)
        ));
        assert!(matches!(pack.save(), Err(PackError::Terminated)));
        assert!(matches!(c.save_schemas(), Err(PackError::Terminated)));
    }

    #[test]
    fn find_by_type_scans_schema() {
        let c = Container::in_memory(registry());
        let mut pack = c.new_root(feed(), Flags::NATIVE).unwrap();
        pack.append([note("a"), note("b")]).unwrap();
        pack.save().unwrap();

        let found = c.find_by_type("test.Note").unwrap();
        assert_eq!(found.len(), 2);
        for d in pack.root().refs().iter() {
            assert!(found.contains(&d.hash()));
        }
        assert!(matches!(
            c.find_by_type("test.Missing"),
            Err(PackError::Registry(RegistryError::UnregisteredType { .. }))
        ));
    }

    #[test]
    fn schemas_persist_with_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.knot");
        let root_hash = {
            let backend = Arc::new(FileBackend::open(&path).unwrap());
            let c = Container::new(backend, registry(), ContainerConfig::default());
            assert_eq!(c.save_schemas().unwrap(), 1);
            let mut pack = c.new_root(feed(), Flags::NATIVE).unwrap();
            pack.append([note("persisted")]).unwrap();
            pack.save().unwrap().hash
        };

        let backend: Arc<dyn KvBackend> = Arc::new(FileBackend::open(&path).unwrap());
        let loaded = Registry::load(&ContentStore::new(backend.clone())).unwrap();
        assert!(loaded.schema("test.Note").is_some());

        let c = Container::new(backend, Arc::new(loaded), ContainerConfig::default());
        let mut pack = c.open_last(&feed(), Flags::NATIVE).unwrap().unwrap();
        assert_eq!(pack.root().hash(), root_hash);
        assert_eq!(
            pack.value_at(0).unwrap().and_then(|r| r.get("text")).and_then(|v| v.as_str()),
            Some("persisted")
        );
    }

    #[test]
    fn collection_ids_are_unique() {
        let c = Container::in_memory(registry());
        let a = c.new_root(feed(), Flags::NATIVE).unwrap();
        let b = c.new_root(feed(), Flags::NATIVE).unwrap();
        assert_ne!(a.root().refs().id(), b.root().refs().id());
    }
}
