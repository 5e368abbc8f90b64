use std::sync::Arc;

use knot_crypto::ContentHasher;
use knot_types::Hash;
use tracing::debug;

use crate::backend::{Bucket, KvBackend};
use crate::envelope::Envelope;
use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryBackend;

/// One entry of the root index: the root `hash` committed as `seq` of `feed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootEntry {
    pub feed: Hash,
    pub seq: u64,
    pub hash: Hash,
}

/// Writes committed together by [`ContentStore::commit`].
#[derive(Clone, Debug, Default)]
pub struct Batch {
    objects: Vec<(Hash, Vec<u8>)>,
    roots: Vec<RootEntry>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an encoded object under `key`.
    pub fn object(&mut self, key: Hash, bytes: Vec<u8>) -> &mut Self {
        self.objects.push((key, bytes));
        self
    }

    /// Add a root index entry.
    pub fn root(&mut self, entry: RootEntry) -> &mut Self {
        self.roots.push(entry);
        self
    }

    /// Number of objects in the batch.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if the batch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.roots.is_empty()
    }
}

fn root_key(feed: &Hash, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(Hash::LEN + 8);
    key.extend_from_slice(feed.as_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn parse_root_key(key: &[u8]) -> Option<(Hash, u64)> {
    if key.len() != Hash::LEN + 8 {
        return None;
    }
    let feed = Hash::from_slice(&key[..Hash::LEN]).ok()?;
    let seq = u64::from_be_bytes(key[Hash::LEN..].try_into().ok()?);
    Some((feed, seq))
}

/// Envelope storage keyed by content hash, plus the root index.
///
/// A thin layer over a [`KvBackend`]: it derives keys, decodes envelopes,
/// and scans by schema. It keeps no cache of its own.
#[derive(Clone)]
pub struct ContentStore {
    backend: Arc<dyn KvBackend>,
}

impl ContentStore {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// A store over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    /// Store encoded bytes under their content key.
    ///
    /// Idempotent: storing the same bytes twice returns the same key and
    /// writes once.
    pub fn put(&self, bytes: &[u8]) -> StoreResult<Hash> {
        let key = Envelope::key_of(bytes);
        self.backend.update(&mut |tx| {
            if tx.get(Bucket::Objects, key.as_bytes()).is_none() {
                tx.put(Bucket::Objects, key.as_bytes(), bytes);
            }
            Ok(())
        })?;
        Ok(key)
    }

    /// Encode and store an envelope.
    pub fn put_envelope(&self, envelope: &Envelope) -> StoreResult<Hash> {
        self.put(&envelope.encode()?)
    }

    /// Read and decode the envelope stored under `key`.
    pub fn get(&self, key: &Hash) -> StoreResult<Envelope> {
        let bytes = self.get_raw(key)?;
        Envelope::decode(&bytes).map_err(|e| StoreError::CorruptObject {
            id: *key,
            reason: e.to_string(),
        })
    }

    /// Read the raw bytes stored under `key`.
    pub fn get_raw(&self, key: &Hash) -> StoreResult<Vec<u8>> {
        self.try_get_raw(key)?.ok_or(StoreError::NotFound(*key))
    }

    /// Probe for `key`; absence is not an error.
    ///
    /// Bytes that no longer hash to `key` are reported as `CorruptObject`.
    pub fn try_get_raw(&self, key: &Hash) -> StoreResult<Option<Vec<u8>>> {
        let mut out = None;
        self.backend.view(&mut |tx| {
            out = tx.get(Bucket::Objects, key.as_bytes());
            Ok(())
        })?;
        match out {
            Some(bytes) if !ContentHasher::OBJECT.verify(&bytes, key) => {
                Err(StoreError::CorruptObject {
                    id: *key,
                    reason: "content does not match its key".into(),
                })
            }
            out => Ok(out),
        }
    }

    /// Check whether `key` is stored.
    pub fn contains(&self, key: &Hash) -> StoreResult<bool> {
        let mut found = false;
        self.backend.view(&mut |tx| {
            found = tx.get(Bucket::Objects, key.as_bytes()).is_some();
            Ok(())
        })?;
        Ok(found)
    }

    /// Number of stored objects.
    pub fn len(&self) -> StoreResult<usize> {
        let mut n = 0;
        self.backend.view(&mut |tx| {
            n = tx.len(Bucket::Objects);
            Ok(())
        })?;
        Ok(n)
    }

    /// Returns `true` if no object is stored.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Keys of every stored envelope tagged with `schema`.
    ///
    /// A linear scan over the schema prefix of each record. Calling it again
    /// re-runs the scan against the current state.
    pub fn find_by_schema(&self, schema: &Hash) -> StoreResult<Vec<Hash>> {
        let mut keys = Vec::new();
        self.backend.view(&mut |tx| {
            keys = tx.range(Bucket::Objects, &mut |_, value| {
                value.len() >= Hash::LEN && &value[..Hash::LEN] == schema.as_bytes()
            });
            Ok(())
        })?;
        let hashes = keys
            .iter()
            .map(|k| Hash::from_slice(k))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(schema = %schema.short_hex(), found = hashes.len(), "schema scan");
        Ok(hashes)
    }

    /// Write a batch of objects and root index entries in one transaction.
    ///
    /// Objects already present are skipped. A root index entry that is
    /// already bound to a different hash aborts the whole batch.
    pub fn commit(&self, batch: &Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.backend.update(&mut |tx| {
            for (key, bytes) in &batch.objects {
                if tx.get(Bucket::Objects, key.as_bytes()).is_none() {
                    tx.put(Bucket::Objects, key.as_bytes(), bytes);
                }
            }
            for entry in &batch.roots {
                let rk = root_key(&entry.feed, entry.seq);
                match tx.get(Bucket::Roots, &rk) {
                    Some(existing) if existing.as_slice() != entry.hash.as_bytes() => {
                        return Err(StoreError::RootConflict {
                            feed: entry.feed,
                            seq: entry.seq,
                        });
                    }
                    Some(_) => {}
                    None => tx.put(Bucket::Roots, &rk, entry.hash.as_bytes()),
                }
            }
            Ok(())
        })?;
        debug!(
            objects = batch.objects.len(),
            roots = batch.roots.len(),
            "batch committed"
        );
        Ok(())
    }

    /// The hash of root `seq` of `feed`, if committed.
    pub fn root_hash(&self, feed: &Hash, seq: u64) -> StoreResult<Option<Hash>> {
        let mut out = None;
        self.backend.view(&mut |tx| {
            out = tx.get(Bucket::Roots, &root_key(feed, seq));
            Ok(())
        })?;
        out.map(|v| Hash::from_slice(&v)).transpose().map_err(Into::into)
    }

    /// Every committed root of `feed`, ascending by sequence.
    pub fn roots(&self, feed: &Hash) -> StoreResult<Vec<RootEntry>> {
        let mut entries = Vec::new();
        self.backend.view(&mut |tx| {
            let keys = tx.range(Bucket::Roots, &mut |k, _| k.starts_with(feed.as_bytes()));
            for key in keys {
                let Some((feed, seq)) = parse_root_key(&key) else {
                    continue;
                };
                if let Some(value) = tx.get(Bucket::Roots, &key) {
                    entries.push(RootEntry {
                        feed,
                        seq,
                        hash: Hash::from_slice(&value)?,
                    });
                }
            }
            Ok(())
        })?;
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    /// The latest committed root of `feed`.
    pub fn last_root(&self, feed: &Hash) -> StoreResult<Option<RootEntry>> {
        Ok(self.roots(feed)?.pop())
    }

    /// Every feed with at least one committed root.
    pub fn feeds(&self) -> StoreResult<Vec<Hash>> {
        let mut keys = Vec::new();
        self.backend.view(&mut |tx| {
            keys = tx.range(Bucket::Roots, &mut |_, _| true);
            Ok(())
        })?;
        let mut feeds: Vec<Hash> = keys
            .iter()
            .filter_map(|k| parse_root_key(k).map(|(feed, _)| feed))
            .collect();
        feeds.dedup();
        Ok(feeds)
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("objects", &self.len().unwrap_or(0))
            .finish()
    }
}
