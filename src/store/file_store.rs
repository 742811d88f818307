//! Single-file node store with content-addressed storage
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("UNITREE\0")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - object_count: 8 bytes (u64 LE)
//!   - index_offset: 8 bytes (u64 LE)
//!   - reserved: 32 bytes
//!
//! [OBJECTS: variable]
//!   - framed node bodies, concatenated
//!
//! [INDEX: variable]
//!   - sorted array of (hash, offset, size) entries
//! ```
//!
//! The file only grows. Objects are appended past the last flushed index and
//! a flush appends a fresh index after them, syncs it, and only then points
//! the header at it. A crash before the header write leaves the previous
//! index live, so an unflushed batch is invisible on the next open and every
//! flushed object stays reachable.

use super::blob::Blob;
use super::NodeStore;
use crate::model::Hash;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const HEADER_SIZE: u64 = 64;

/// 32 hash + 8 offset + 4 size
const INDEX_ENTRY_SIZE: usize = 44;

/// Index entry for an object
#[derive(Clone, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

/// A content-addressed node store backed by a single file
pub struct FileNodeStore {
    /// Path to the store file
    path: std::path::PathBuf,
    /// The file handle
    file: RwLock<File>,
    /// In-memory index
    index: RwLock<HashMap<Hash, IndexEntry>>,
    /// Current append position, always past the live index
    write_offset: RwLock<u64>,
    /// Objects written since the last index flush
    dirty: RwLock<bool>,
    closed: RwLock<bool>,
}

impl FileNodeStore {
    /// Create a new store file, truncating any existing one
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        Ok(FileNodeStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(HashMap::new()),
            write_offset: RwLock::new(HEADER_SIZE),
            dirty: RwLock::new(false),
            closed: RwLock::new(false),
        })
    }

    /// Open an existing store file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = read_u32(&header[8..12]);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let object_count = read_u64(&header[16..24]);
        let index_offset = read_u64(&header[24..32]);

        let mut index = HashMap::new();
        if index_offset > 0 && object_count > 0 {
            file.seek(SeekFrom::Start(index_offset))?;
            for _ in 0..object_count {
                let mut entry_buf = [0u8; INDEX_ENTRY_SIZE];
                file.read_exact(&mut entry_buf)?;

                let hash = Hash::from_slice(&entry_buf[0..32])?;
                let offset = read_u64(&entry_buf[32..40]);
                let size = read_u32(&entry_buf[40..44]);

                index.insert(hash, IndexEntry { offset, size });
            }
        }

        // Objects written after the live index were never flushed; reuse
        // their space but never the index itself.
        let write_offset = if index_offset > 0 {
            index_offset + object_count * INDEX_ENTRY_SIZE as u64
        } else {
            HEADER_SIZE
        };

        Ok(FileNodeStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
            write_offset: RwLock::new(write_offset),
            dirty: RwLock::new(false),
            closed: RwLock::new(false),
        })
    }

    /// Open or create a store file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Check if a hash exists
    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.read().contains_key(hash)
    }

    /// Get the number of objects in the store
    pub fn object_count(&self) -> usize {
        self.index.read().len()
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Storage(format!(
                "node store {} is closed",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Append the index after the objects, sync it, then publish it in the
    /// header
    fn write_index(&self) -> Result<()> {
        let mut dirty = self.dirty.write();
        if !*dirty {
            return Ok(());
        }

        let index = self.index.read();
        let mut write_offset = self.write_offset.write();
        let mut file = self.file.write();
        let index_offset = *write_offset;

        // Sort by hash for determinism
        let mut entries: Vec<_> = index.iter().collect();
        entries.sort_by_key(|(h, _)| *h.as_bytes());

        let mut buf = Vec::with_capacity(entries.len() * INDEX_ENTRY_SIZE);
        for (hash, entry) in entries {
            buf.extend_from_slice(hash.as_bytes());
            buf.extend_from_slice(&entry.offset.to_le_bytes());
            buf.extend_from_slice(&entry.size.to_le_bytes());
        }

        file.seek(SeekFrom::Start(index_offset))?;
        file.write_all(&buf)?;
        let index_end = index_offset + buf.len() as u64;
        file.set_len(index_end)?;
        file.sync_data()?;

        file.seek(SeekFrom::Start(16))?;
        file.write_all(&(index.len() as u64).to_le_bytes())?;
        file.write_all(&index_offset.to_le_bytes())?;
        file.sync_all()?;

        *write_offset = index_end;
        *dirty = false;
        Ok(())
    }
}

impl NodeStore for FileNodeStore {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        let entry = self.index.read().get(hash).cloned();

        let Some(entry) = entry else {
            return Ok(None);
        };

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(entry.offset))?;

        let mut frame = vec![0u8; entry.size as usize];
        file.read_exact(&mut frame)?;

        Ok(Some(Blob::decode(&frame)?.data))
    }

    fn put_batch(&self, entries: Vec<(Hash, Vec<u8>)>) -> Result<()> {
        self.ensure_open()?;

        // Holding the index for the whole batch keeps it invisible to readers
        // until every frame is on disk. Lock order matches `write_index`.
        let mut dirty = self.dirty.write();
        let mut index = self.index.write();
        let mut write_offset = self.write_offset.write();
        let mut file = self.file.write();

        let mut offset = *write_offset;
        let mut staged: HashMap<Hash, IndexEntry> = HashMap::new();

        for (hash, data) in entries {
            if index.contains_key(&hash) || staged.contains_key(&hash) {
                continue;
            }

            let frame = Blob::new(data).encode()?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&frame)?;

            let size = frame.len() as u32;
            staged.insert(hash, IndexEntry { offset, size });
            offset += size as u64;
        }

        if !staged.is_empty() {
            *dirty = true;
        }
        *write_offset = offset;
        index.extend(staged);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.write_index()
    }

    fn close(&self) -> Result<()> {
        if *self.closed.read() {
            return Ok(());
        }
        self.write_index()?;
        *self.closed.write() = true;
        Ok(())
    }
}

impl Drop for FileNodeStore {
    fn drop(&mut self) {
        if !*self.closed.read() {
            // Best-effort sync on drop
            let _ = self.write_index();
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn h(byte: u8) -> Hash {
        Hash::from_bytes([byte; 32])
    }

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.unitree");

        {
            let store = FileNodeStore::create(&path).unwrap();
            assert_eq!(store.object_count(), 0);
        }

        {
            let store = FileNodeStore::open(&path).unwrap();
            assert_eq!(store.object_count(), 0);
        }
    }

    #[test]
    fn test_put_get() {
        let dir = tempdir().unwrap();
        let store = FileNodeStore::create(dir.path().join("nodes.unitree")).unwrap();

        store
            .put_batch(vec![(h(1), b"one".to_vec()), (h(2), vec![b'x'; 1000])])
            .unwrap();

        assert_eq!(store.get(&h(1)).unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get(&h(2)).unwrap(), Some(vec![b'x'; 1000]));
        assert_eq!(store.get(&h(3)).unwrap(), None);
    }

    #[test]
    fn test_deduplication() {
        let dir = tempdir().unwrap();
        let store = FileNodeStore::create(dir.path().join("nodes.unitree")).unwrap();

        store.put_batch(vec![(h(1), b"data".to_vec())]).unwrap();
        store
            .put_batch(vec![(h(1), b"data".to_vec()), (h(1), b"data".to_vec())])
            .unwrap();

        assert_eq!(store.object_count(), 1);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.unitree");

        {
            let store = FileNodeStore::create(&path).unwrap();
            store.put_batch(vec![(h(1), b"kept".to_vec())]).unwrap();
            store.flush().unwrap();
            store.put_batch(vec![(h(2), b"more".to_vec())]).unwrap();
            store.close().unwrap();
        }

        {
            let store = FileNodeStore::open(&path).unwrap();
            assert_eq!(store.get(&h(1)).unwrap(), Some(b"kept".to_vec()));
            assert_eq!(store.get(&h(2)).unwrap(), Some(b"more".to_vec()));

            // append after reopen must not clobber existing objects
            store.put_batch(vec![(h(3), b"third".to_vec())]).unwrap();
            store.flush().unwrap();
        }

        let store = FileNodeStore::open(&path).unwrap();
        assert_eq!(store.object_count(), 3);
        assert_eq!(store.get(&h(1)).unwrap(), Some(b"kept".to_vec()));
        assert_eq!(store.get(&h(3)).unwrap(), Some(b"third".to_vec()));
    }

    #[test]
    fn test_unflushed_batch_keeps_flushed_objects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.unitree");

        let store = FileNodeStore::create(&path).unwrap();
        store.put_batch(vec![(h(1), b"committed".to_vec())]).unwrap();
        store.flush().unwrap();
        store.put_batch(vec![(h(2), vec![b'y'; 300])]).unwrap();
        // crash: no flush and no drop
        std::mem::forget(store);

        let store = FileNodeStore::open(&path).unwrap();
        assert_eq!(store.get(&h(1)).unwrap(), Some(b"committed".to_vec()));
        assert_eq!(store.get(&h(2)).unwrap(), None);

        // the space of the lost batch is reused without touching the index
        store.put_batch(vec![(h(3), vec![b'z'; 300])]).unwrap();
        store.flush().unwrap();
        drop(store);

        let store = FileNodeStore::open(&path).unwrap();
        assert_eq!(store.object_count(), 2);
        assert_eq!(store.get(&h(1)).unwrap(), Some(b"committed".to_vec()));
        assert_eq!(store.get(&h(3)).unwrap(), Some(vec![b'z'; 300]));
    }

    #[test]
    fn test_flush_without_writes_does_not_grow_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.unitree");

        let store = FileNodeStore::create(&path).unwrap();
        store.put_batch(vec![(h(1), b"one".to_vec())]).unwrap();
        store.flush().unwrap();
        let len = std::fs::metadata(&path).unwrap().len();

        store.flush().unwrap();
        store.flush().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);
    }

    #[test]
    fn test_closed_store_rejects_writes() {
        let dir = tempdir().unwrap();
        let store = FileNodeStore::create(dir.path().join("nodes.unitree")).unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert!(matches!(
            store.put_batch(vec![(h(1), b"late".to_vec())]),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, [0u8; 64]).unwrap();

        assert!(matches!(
            FileNodeStore::open(&path),
            Err(Error::InvalidFile(_))
        ));
    }
}
