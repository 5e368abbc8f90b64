use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use knot_types::codec;
use tracing::debug;

use crate::backend::{Bucket, KvBackend, ReadTx, WriteTx};
use crate::error::{StoreError, StoreResult};
use crate::memory::{apply, poisoned, Overlay, Snapshot, Tables};

const MAGIC: &[u8; 4] = b"KNOT";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 12;

/// Single-file persistent backend.
///
/// The whole database lives in one snapshot file:
///
/// ```text
/// "KNOT" | version (u32 LE) | crc32 of body (u32 LE) | body (codec-encoded tables)
/// ```
///
/// Every successful read-write transaction rewrites the snapshot through a
/// temporary file that is renamed over the old one. The in-memory state is
/// only replaced after the rename succeeded, so a failed commit leaves both
/// the file and the visible state untouched.
pub struct FileBackend {
    path: PathBuf,
    tables: RwLock<Tables>,
}

impl FileBackend {
    /// Open the snapshot at `path`, or start empty if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let bytes = std::fs::read(&path)?;
            decode_snapshot(&path, &bytes)?
        } else {
            Tables::new()
        };
        debug!(path = %path.display(), "file backend opened");
        Ok(Self {
            path,
            tables: RwLock::new(tables),
        })
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of keys in a bucket.
    pub fn len(&self, bucket: Bucket) -> usize {
        self.tables
            .read()
            .map(|t| t.get(&bucket).map_or(0, |b| b.len()))
            .unwrap_or(0)
    }

    /// Returns `true` if no bucket holds any key.
    pub fn is_empty(&self) -> bool {
        self.tables
            .read()
            .map(|t| t.values().all(|b| b.is_empty()))
            .unwrap_or(true)
    }

    fn persist(&self, tables: &Tables) -> StoreResult<()> {
        let body = codec::encode(tables)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        bytes.extend_from_slice(&body);

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot persisted");
        Ok(())
    }
}

fn decode_snapshot(path: &Path, bytes: &[u8]) -> StoreResult<Tables> {
    let corrupt = |reason: String| StoreError::CorruptSnapshot {
        path: path.to_path_buf(),
        reason,
    };
    if bytes.len() < HEADER_LEN {
        return Err(corrupt(format!("file too short: {} bytes", bytes.len())));
    }
    if &bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic".into()));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VERSION {
        return Err(corrupt(format!("unsupported version {version}")));
    }
    let expected = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let body = &bytes[HEADER_LEN..];
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(corrupt(format!(
            "crc mismatch: expected {expected:#010x}, got {actual:#010x}"
        )));
    }
    codec::decode(body).map_err(|e| corrupt(e.to_string()))
}

impl KvBackend for FileBackend {
    fn view(&self, f: &mut dyn FnMut(&dyn ReadTx) -> StoreResult<()>) -> StoreResult<()> {
        let tables = self.tables.read().map_err(poisoned)?;
        f(&Snapshot::new(&tables))
    }

    fn update(&self, f: &mut dyn FnMut(&mut dyn WriteTx) -> StoreResult<()>) -> StoreResult<()> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let mut overlay = Overlay::new(&tables);
        f(&mut overlay)?;
        let pending = overlay.into_pending();
        if pending.values().all(|b| b.is_empty()) {
            return Ok(());
        }
        let mut next = tables.clone();
        apply(&mut next, pending);
        self.persist(&next)?;
        *tables = next;
        Ok(())
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("objects", &self.len(Bucket::Objects))
            .finish()
    }
}
