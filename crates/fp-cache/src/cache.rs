//! Size-bounded LRU cache interposed between the engine and the network.
//!
//! One [`CacheLayer`] is shared by every playback attempt. Its store is
//! opened lazily on first use and kept for the life of the layer. Any storage
//! I/O failure degrades the affected request to a direct fetch and never adds
//! an entry.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use fp_core::config::CacheConfig;
use fp_core::{Error, Result};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::fetch::{ByteRange, Fetcher};
use crate::source::DataSource;
use crate::store::{ByteStore, DiskByteStore, StoredEntry};

type StoreOpener = Arc<dyn Fn() -> io::Result<Arc<dyn ByteStore>> + Send + Sync>;

/// Store key for a source URL: hex SHA-256 of the URL.
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Requests served without storing (storage failure or oversize body).
    pub bypasses: u64,
    pub entries: usize,
    pub stored_bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
}

/// Entry in the recency index.
#[derive(Debug)]
struct IndexEntry {
    len: u64,
    /// Logical clock value of the last read or write.
    last_access: u64,
    /// Open reads; an entry with readers is never evicted.
    readers: Arc<AtomicUsize>,
}

/// Keeps an entry pinned while its body is being read.
struct ReadLease {
    readers: Arc<AtomicUsize>,
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Lookup {
    Hit(Bytes),
    Miss,
    /// The entry exists but the store failed to read it.
    Failed,
}

/// Process-wide, size-bounded content cache keyed by source URL.
pub struct CacheLayer {
    capacity: u64,
    fetcher: Arc<dyn Fetcher>,
    open_store: StoreOpener,
    store: OnceCell<Arc<dyn ByteStore>>,
    index: DashMap<String, IndexEntry>,
    /// Per-key write serialization.
    writers: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Serializes space reservation and eviction.
    space: Mutex<()>,
    total_bytes: AtomicU64,
    clock: AtomicU64,
    counters: Counters,
}

impl CacheLayer {
    /// Cache backed by a [`DiskByteStore`] under `config.dir`.
    pub fn new(config: &CacheConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let dir = config.dir.clone();
        Self::with_store(config.capacity_bytes, fetcher, move || {
            Ok(Arc::new(DiskByteStore::open(dir.clone())?) as Arc<dyn ByteStore>)
        })
    }

    /// Cache backed by whatever store `open_store` produces on first use.
    pub fn with_store<F>(capacity: u64, fetcher: Arc<dyn Fetcher>, open_store: F) -> Self
    where
        F: Fn() -> io::Result<Arc<dyn ByteStore>> + Send + Sync + 'static,
    {
        Self {
            capacity,
            fetcher,
            open_store: Arc::new(open_store),
            store: OnceCell::new(),
            index: DashMap::new(),
            writers: DashMap::new(),
            space: Mutex::new(()),
            total_bytes: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Return the cached body for `url`, fetching and storing it on a miss.
    pub async fn get_or_fetch(&self, url: &str) -> Result<Bytes> {
        let store = match self.store().await {
            Ok(store) => Arc::clone(store),
            Err(e) => {
                tracing::warn!(url, error = %e, "Cache unavailable; fetching directly");
                return self.fetch_direct(url).await;
            }
        };
        let key = cache_key(url);

        match self.read_cached(&store, &key).await {
            Lookup::Hit(body) => return Ok(body),
            Lookup::Failed => return self.fetch_direct(url).await,
            Lookup::Miss => {}
        }

        let writer = self.writer(&key);
        let result = {
            let _guard = writer.lock().await;
            self.fill(&store, url, &key).await
        };
        drop(writer);
        self.writers
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Miss path; runs with the key's writer lock held.
    async fn fill(&self, store: &Arc<dyn ByteStore>, url: &str, key: &str) -> Result<Bytes> {
        // Another request may have filled the entry while we waited.
        match self.read_cached(store, key).await {
            Lookup::Hit(body) => return Ok(body),
            Lookup::Failed => return self.fetch_direct(url).await,
            Lookup::Miss => {}
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let body = self.fetcher.fetch(url, None).await?;

        match self.insert(store, key, &body).await {
            Ok(true) => tracing::debug!(url, bytes = body.len(), "Cached body"),
            Ok(false) => {
                self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(url, error = %e, "Failed to store body; serving uncached");
            }
        }
        Ok(body)
    }

    /// Whether `url` currently has a cache entry.
    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(&cache_key(url))
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Aggregate bytes held by the store.
    pub fn stored_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            bypasses: self.counters.bypasses.load(Ordering::Relaxed),
            entries: self.len(),
            stored_bytes: self.stored_bytes(),
        }
    }

    /// Drop every entry that is not currently being read.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let Some(store) = self.store.get() else {
            return 0;
        };

        let _space = self.space.lock();
        let keys: Vec<String> = self.index.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;
        for key in keys {
            if self.remove_entry(store.as_ref(), &key) {
                removed += 1;
            }
        }
        tracing::info!(removed, "Cleared cache");
        removed
    }

    async fn store(&self) -> Result<&Arc<dyn ByteStore>> {
        self.store
            .get_or_try_init(|| async {
                let open_store = Arc::clone(&self.open_store);
                let (store, entries) = blocking(move || {
                    let store = open_store()?;
                    let entries = store.scan()?;
                    Ok((store, entries))
                })
                .await
                .map_err(Error::cache_io)?;
                self.rebuild_index(store.as_ref(), entries);
                Ok::<_, Error>(store)
            })
            .await
    }

    fn rebuild_index(&self, store: &dyn ByteStore, mut entries: Vec<StoredEntry>) {
        entries.sort_by_key(|e| e.last_access);
        for entry in entries {
            self.total_bytes.fetch_add(entry.len, Ordering::SeqCst);
            self.index.insert(
                entry.key,
                IndexEntry {
                    len: entry.len,
                    last_access: self.tick(),
                    readers: Arc::new(AtomicUsize::new(0)),
                },
            );
        }

        tracing::info!(
            entries = self.index.len(),
            bytes = self.stored_bytes(),
            capacity = self.capacity,
            "Cache index loaded"
        );

        // The capacity may have shrunk since the store was last used.
        let _space = self.space.lock();
        self.evict_until_fits(store, 0);
    }

    async fn fetch_direct(&self, url: &str) -> Result<Bytes> {
        self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
        self.fetcher.fetch(url, None).await
    }

    async fn read_cached(&self, store: &Arc<dyn ByteStore>, key: &str) -> Lookup {
        let Some(lease) = self.lease(key) else {
            return Lookup::Miss;
        };

        let read = {
            let store = Arc::clone(store);
            let key = key.to_string();
            blocking(move || store.read(&key)).await
        };
        match read {
            Ok(body) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Lookup::Hit(body)
            }
            Err(e) => {
                tracing::warn!(key, error = %Error::cache_io(e), "Cache read failed");
                drop(lease);
                let _space = self.space.lock();
                self.remove_entry(store.as_ref(), key);
                Lookup::Failed
            }
        }
    }

    fn lease(&self, key: &str) -> Option<ReadLease> {
        let mut entry = self.index.get_mut(key)?;
        entry.last_access = self.tick();
        entry.readers.fetch_add(1, Ordering::SeqCst);
        Some(ReadLease {
            readers: Arc::clone(&entry.readers),
        })
    }

    /// Store a body. Returns `Ok(false)` when it cannot fit at all.
    async fn insert(&self, store: &Arc<dyn ByteStore>, key: &str, body: &Bytes) -> Result<bool> {
        let len = body.len() as u64;
        if len > self.capacity {
            tracing::debug!(key, bytes = len, capacity = self.capacity, "Body larger than cache");
            return Ok(false);
        }

        {
            let _space = self.space.lock();
            if !self.evict_until_fits(store.as_ref(), len) {
                tracing::debug!(key, bytes = len, "No evictable space; not caching");
                return Ok(false);
            }
            self.total_bytes.fetch_add(len, Ordering::SeqCst);
        }

        let written = {
            let store = Arc::clone(store);
            let key = key.to_string();
            let body = body.clone();
            blocking(move || store.write(&key, &body)).await
        };
        if let Err(e) = written {
            self.total_bytes.fetch_sub(len, Ordering::SeqCst);
            return Err(Error::cache_io(e));
        }

        self.index.insert(
            key.to_string(),
            IndexEntry {
                len,
                last_access: self.tick(),
                readers: Arc::new(AtomicUsize::new(0)),
            },
        );
        Ok(true)
    }

    /// Evict least-recently-used idle entries until `incoming` more bytes fit.
    ///
    /// Caller must hold `self.space`.
    fn evict_until_fits(&self, store: &dyn ByteStore, incoming: u64) -> bool {
        while self.total_bytes.load(Ordering::SeqCst) + incoming > self.capacity {
            let victim = self
                .index
                .iter()
                .filter(|e| e.readers.load(Ordering::SeqCst) == 0)
                .min_by_key(|e| e.last_access)
                .map(|e| e.key().clone());

            let Some(victim) = victim else {
                return false;
            };
            if self.remove_entry(store, &victim) {
                tracing::debug!(key = %victim, "Evicted cache entry");
            }
        }
        true
    }

    /// Remove an idle entry from the index and the store.
    ///
    /// Caller must hold `self.space`.
    fn remove_entry(&self, store: &dyn ByteStore, key: &str) -> bool {
        let Some((_, entry)) = self
            .index
            .remove_if(key, |_, e| e.readers.load(Ordering::SeqCst) == 0)
        else {
            return false;
        };

        self.total_bytes.fetch_sub(entry.len, Ordering::SeqCst);
        if let Err(e) = store.remove(key) {
            tracing::warn!(key, error = %e, "Failed to remove cached body");
        }
        true
    }

    fn writer(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.writers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .value(),
        )
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }
}

/// Run a store operation on the blocking pool.
async fn blocking<T, F>(op: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(io::Error::other)?
}

#[async_trait]
impl DataSource for CacheLayer {
    async fn open(&self, url: &str) -> Result<Bytes> {
        self.get_or_fetch(url).await
    }

    async fn read_range(&self, url: &str, range: ByteRange) -> Result<Bytes> {
        let body = self.get_or_fetch(url).await?;
        Ok(range.slice(&body))
    }
}
