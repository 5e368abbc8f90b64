use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::backend::{Bucket, KvBackend, ReadTx, WriteTx};
use crate::error::{StoreError, StoreResult};

/// Committed state: one ordered map per bucket.
pub(crate) type Tables = BTreeMap<Bucket, BTreeMap<Vec<u8>, Vec<u8>>>;

/// Read-only view over committed tables.
pub(crate) struct Snapshot<'a> {
    tables: &'a Tables,
}

impl<'a> Snapshot<'a> {
    pub(crate) fn new(tables: &'a Tables) -> Self {
        Self { tables }
    }
}

impl ReadTx for Snapshot<'_> {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Option<Vec<u8>> {
        self.tables.get(&bucket)?.get(key).cloned()
    }

    fn range(
        &self,
        bucket: Bucket,
        predicate: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Vec<Vec<u8>> {
        let Some(table) = self.tables.get(&bucket) else {
            return Vec::new();
        };
        table
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn len(&self, bucket: Bucket) -> usize {
        self.tables.get(&bucket).map_or(0, BTreeMap::len)
    }
}

/// Pending writes layered over committed tables.
pub(crate) struct Overlay<'a> {
    base: &'a Tables,
    pending: Tables,
}

impl<'a> Overlay<'a> {
    pub(crate) fn new(base: &'a Tables) -> Self {
        Self {
            base,
            pending: Tables::new(),
        }
    }

    pub(crate) fn into_pending(self) -> Tables {
        self.pending
    }
}

impl WriteTx for Overlay<'_> {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Option<Vec<u8>> {
        self.pending
            .get(&bucket)
            .and_then(|t| t.get(key))
            .or_else(|| self.base.get(&bucket).and_then(|t| t.get(key)))
            .cloned()
    }

    fn put(&mut self, bucket: Bucket, key: &[u8], value: &[u8]) {
        self.pending
            .entry(bucket)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
    }
}

/// Merge pending writes into committed tables.
pub(crate) fn apply(tables: &mut Tables, pending: Tables) {
    for (bucket, entries) in pending {
        tables.entry(bucket).or_default().extend(entries);
    }
}

pub(crate) fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(format!("lock poisoned: {e}"))
}

/// In-memory transactional backend.
///
/// Intended for tests and embedding. A read-write transaction holds the
/// write lock for its whole duration and stages its writes in an overlay,
/// so readers never see partial state and a failed transaction leaves no
/// trace.
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::new()),
        }
    }

    /// Number of keys in a bucket.
    pub fn len(&self, bucket: Bucket) -> usize {
        self.tables
            .read()
            .map(|t| t.get(&bucket).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Returns `true` if no bucket holds any key.
    pub fn is_empty(&self) -> bool {
        self.tables
            .read()
            .map(|t| t.values().all(BTreeMap::is_empty))
            .unwrap_or(true)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for MemoryBackend {
    fn view(&self, f: &mut dyn FnMut(&dyn ReadTx) -> StoreResult<()>) -> StoreResult<()> {
        let tables = self.tables.read().map_err(poisoned)?;
        f(&Snapshot::new(&tables))
    }

    fn update(&self, f: &mut dyn FnMut(&mut dyn WriteTx) -> StoreResult<()>) -> StoreResult<()> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let mut overlay = Overlay::new(&tables);
        f(&mut overlay)?;
        let pending = overlay.into_pending();
        apply(&mut tables, pending);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("objects", &self.len(Bucket::Objects))
            .field("roots", &self.len(Bucket::Roots))
            .finish()
    }
}
