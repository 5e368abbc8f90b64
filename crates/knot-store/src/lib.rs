//! Content-addressed envelope storage for Knot.
//!
//! Every record Knot persists (object payloads, schemas, root snapshots) is
//! wrapped in an [`Envelope`] and stored under the BLAKE3 hash of the
//! envelope's encoding. The [`ContentStore`] derives keys, decodes envelopes,
//! scans by schema, and maintains the per-feed root index.
//!
//! # Backends
//!
//! Storage is delegated to a transactional [`KvBackend`]:
//!
//! - [`MemoryBackend`] -- ordered maps behind a lock, for tests and embedding
//! - [`FileBackend`] -- a single checksummed snapshot file, rewritten atomically
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. A read-write transaction is all-or-nothing.
//! 3. Concurrent reads are always safe.
//! 4. The content store never interprets payloads, only the schema prefix.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod backend;
pub mod content;
pub mod envelope;
pub mod error;
pub mod file;
pub mod memory;

pub use backend::{Bucket, KvBackend, ReadTx, WriteTx};
pub use content::{Batch, ContentStore, RootEntry};
pub use envelope::{Envelope, ROOT_TAG, SCHEMA_TAG};
pub use error::{StoreError, StoreResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
