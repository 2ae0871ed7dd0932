//! Durable byte storage behind the cache.
//!
//! Stores are deliberately dumb: they persist and return bodies by key and
//! report what they hold. Capacity, recency and eviction live in
//! [`CacheLayer`](crate::CacheLayer).

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::RwLock;

const BODY_EXT: &str = "bin";
const PARTIAL_EXT: &str = "part";

/// An entry found when scanning a store.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// Store key (hex SHA-256 of the source URL).
    pub key: String,
    /// Body length in bytes.
    pub len: u64,
    /// When the entry was last read or written.
    pub last_access: SystemTime,
}

/// Byte storage capability used by the cache.
///
/// Methods may block. The cache runs `scan`, `read` and `write` on Tokio's
/// blocking pool.
pub trait ByteStore: Send + Sync + 'static {
    /// List every complete entry currently held.
    fn scan(&self) -> io::Result<Vec<StoredEntry>>;

    /// Read a whole body.
    fn read(&self, key: &str) -> io::Result<Bytes>;

    /// Persist a whole body, replacing any previous one.
    fn write(&self, key: &str, data: &[u8]) -> io::Result<()>;

    /// Remove a body. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// DiskByteStore
// ---------------------------------------------------------------------------

/// Filesystem store: one `{key}.bin` file per entry under `dir`.
///
/// Writes go to `{key}.part` and are renamed into place, so a crash never
/// leaves a truncated body visible. Reads refresh the file's modification
/// time, which [`scan`](ByteStore::scan) reports as the last access and the
/// cache uses to rebuild its recency order after a restart.
#[derive(Debug)]
pub struct DiskByteStore {
    dir: PathBuf,
}

impl DiskByteStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "Opened disk byte store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{BODY_EXT}"))
    }

    fn partial_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{PARTIAL_EXT}"))
    }
}

impl ByteStore for DiskByteStore {
    fn scan(&self) -> io::Result<Vec<StoredEntry>> {
        let mut entries = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let path = dirent.path();

            match path.extension().and_then(|e| e.to_str()) {
                Some(BODY_EXT) => {}
                Some(PARTIAL_EXT) => {
                    // Leftover from an interrupted write.
                    if let Err(e) = std::fs::remove_file(&path) {
                        tracing::warn!("Failed to remove partial cache file {}: {e}", path.display());
                    }
                    continue;
                }
                _ => continue,
            }

            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let metadata = dirent.metadata()?;
            entries.push(StoredEntry {
                key: key.to_string(),
                len: metadata.len(),
                last_access: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(entries)
    }

    fn read(&self, key: &str) -> io::Result<Bytes> {
        let path = self.body_path(key);
        let data = std::fs::read(&path)?;

        // Best effort: recency survives restarts only approximately anyway.
        if let Ok(file) = std::fs::File::options().write(true).open(&path) {
            let _ = file.set_modified(SystemTime::now());
        }

        Ok(Bytes::from(data))
    }

    fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        let partial = self.partial_path(key);
        std::fs::write(&partial, data)?;
        std::fs::rename(&partial, self.body_path(key))
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match std::fs::remove_file(self.body_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryByteStore
// ---------------------------------------------------------------------------

/// In-memory store for embedding without a writable filesystem.
#[derive(Debug, Default)]
pub struct MemoryByteStore {
    bodies: RwLock<HashMap<String, (Bytes, SystemTime)>>,
}

impl MemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bodies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.read().is_empty()
    }
}

impl ByteStore for MemoryByteStore {
    fn scan(&self) -> io::Result<Vec<StoredEntry>> {
        Ok(self
            .bodies
            .read()
            .iter()
            .map(|(key, (data, at))| StoredEntry {
                key: key.clone(),
                len: data.len() as u64,
                last_access: *at,
            })
            .collect())
    }

    fn read(&self, key: &str) -> io::Result<Bytes> {
        let mut bodies = self.bodies.write();
        let (data, at) = bodies
            .get_mut(key)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no body for {key}")))?;
        *at = SystemTime::now();
        Ok(data.clone())
    }

    fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        self.bodies
            .write()
            .insert(key.to_string(), (Bytes::copy_from_slice(data), SystemTime::now()));
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.bodies.write().remove(key);
        Ok(())
    }
}
