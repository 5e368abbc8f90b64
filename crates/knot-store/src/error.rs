use std::path::PathBuf;

use knot_types::{Hash, TypeError};

/// Errors from content store and backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(Hash),

    /// Encoding or decoding through the codec failed.
    #[error("codec error: {0}")]
    Codec(#[from] TypeError),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored bytes under a key are not a valid envelope.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: Hash, reason: String },

    /// A persisted snapshot file failed its integrity checks.
    #[error("corrupt snapshot {path}: {reason}")]
    CorruptSnapshot { path: PathBuf, reason: String },

    /// A root with the same lineage and sequence but a different hash
    /// is already committed.
    #[error("root conflict: feed {feed} already has seq {seq}")]
    RootConflict { feed: Hash, seq: u64 },

    /// The backend is unusable (poisoned lock, failed transaction).
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
