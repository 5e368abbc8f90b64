use knot_registry::RegistryError;
use knot_store::StoreError;
use knot_types::{Hash, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("object not found: {0}")]
    NotFound(Hash),

    #[error("index {index} out of range for {len} references")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("pack is view only")]
    ViewOnlyTree,

    #[error("object is too large: {} ({size} > {max} bytes)", .hash.short_hex())]
    ObjectTooLarge { hash: Hash, size: usize, max: usize },

    #[error("terminated")]
    Terminated,

    #[error("native values need a pack opened with NATIVE")]
    RawMode,

    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash, actual: Hash },

    #[error("corrupt object {hash}: {reason}")]
    Decode { hash: Hash, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("codec error: {0}")]
    Codec(#[from] TypeError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for PackError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(hash) => Self::NotFound(hash),
            StoreError::CorruptObject { id, reason } => Self::Decode { hash: id, reason },
            other => Self::Store(other),
        }
    }
}

pub type PackResult<T> = Result<T, PackError>;
