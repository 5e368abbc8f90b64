use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Logical namespaces of the key-value backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bucket {
    /// Envelopes keyed by content hash.
    Objects,
    /// Root index: feed ‖ seq (big-endian) -> root hash.
    Roots,
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Objects => write!(f, "objects"),
            Self::Roots => write!(f, "roots"),
        }
    }
}

/// Read side of a transaction.
pub trait ReadTx {
    /// Read the value stored under `key`, if any.
    fn get(&self, bucket: Bucket, key: &[u8]) -> Option<Vec<u8>>;

    /// Return every key whose `(key, value)` pair satisfies `predicate`,
    /// in backend iteration order.
    fn range(
        &self,
        bucket: Bucket,
        predicate: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Vec<Vec<u8>>;

    /// Number of keys in a bucket.
    fn len(&self, bucket: Bucket) -> usize;
}

/// Write side of a transaction.
///
/// Writes are only visible to this transaction until the enclosing
/// [`KvBackend::update`] commits.
pub trait WriteTx {
    /// Read through pending writes, then committed state.
    fn get(&self, bucket: Bucket, key: &[u8]) -> Option<Vec<u8>>;

    /// Stage a write.
    fn put(&mut self, bucket: Bucket, key: &[u8], value: &[u8]);
}

/// Transactional key-value backend.
///
/// All implementations must satisfy these invariants:
/// - `view` never observes writes of an `update` that has not returned.
/// - `update` is atomic: when the closure returns `Err`, or the commit
///   itself fails, none of its writes become visible.
/// - Concurrent `view`s are always safe.
pub trait KvBackend: Send + Sync {
    /// Run a read-only transaction.
    fn view(&self, f: &mut dyn FnMut(&dyn ReadTx) -> StoreResult<()>) -> StoreResult<()>;

    /// Run a read-write transaction, rolling back on error.
    fn update(&self, f: &mut dyn FnMut(&mut dyn WriteTx) -> StoreResult<()>) -> StoreResult<()>;
}
