use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Unpacking granularity and mode of a [`Pack`](crate::Pack).
    ///
    /// Flags combine freely. In text formats (toml, json) they serialize as
    /// `"NATIVE | ENTIRE_TREE"`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Flags: u32 {
        /// Resolve nested references of every resolved object, recursively.
        const ENTIRE_MERKLE_TREES = 1 << 0;
        /// Resolve every top-level reference on open and on `refs()`.
        const ENTIRE_TREE = 1 << 1;
        /// Keep a hash -> position index for `find`.
        const HASH_TABLE_INDEX = 1 << 2;
        /// Forbid mutation and save.
        const VIEW_ONLY = 1 << 3;
        /// Decode payloads into records through the registry.
        const NATIVE = 1 << 4;
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::NATIVE
    }
}
