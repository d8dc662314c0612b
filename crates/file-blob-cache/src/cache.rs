//! File-based blob storage with an in-memory index

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};
use crate::types::{RecordMeta, StoreStats, StoredBlob, Table};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PAYLOAD_EXT: &str = "blob";
const META_EXT: &str = "json";
const TMP_EXT: &str = "tmp";
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

type IndexKey = (Table, String);

/// A durable blob store rooted at a directory
pub struct FileBlobStore {
    /// In-memory copy of on-disk metadata
    index: RwLock<HashMap<IndexKey, RecordMeta>>,
    root: PathBuf,
    /// Maximum total payload bytes across all tables
    max_size: u64,
    /// Records older than this read as misses
    expiry: chrono::Duration,
    current_size: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    tmp_seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl FileBlobStore {
    pub fn new(root: PathBuf, max_size: u64, ttl_secs: u64) -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            root,
            max_size,
            expiry: chrono::Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
            current_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            tmp_seq: AtomicU64::new(0),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File stem for a key: hex SHA-256 of the key
    pub fn record_id(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn table_dir(&self, table: Table) -> PathBuf {
        self.root.join(table.dir_name())
    }

    fn payload_path(&self, table: Table, id: &str) -> PathBuf {
        self.table_dir(table).join(format!("{id}.{PAYLOAD_EXT}"))
    }

    fn meta_path(&self, table: Table, id: &str) -> PathBuf {
        self.table_dir(table).join(format!("{id}.{META_EXT}"))
    }

    fn is_expired(&self, meta: &RecordMeta, now: DateTime<Utc>) -> bool {
        now - meta.stored_at > self.expiry
    }

    /// Create table directories and rebuild the index from disk
    pub async fn open(&self) -> Result<()> {
        for table in Table::ALL {
            fs::create_dir_all(self.table_dir(table)).await?;
        }

        let mut loaded = 0;
        for table in Table::ALL {
            loaded += self.load_table(table).await?;
        }

        info!(
            root = ?self.root,
            entries = loaded,
            total_size = self.current_size.load(Ordering::Relaxed),
            "Durable blob store opened"
        );
        Ok(())
    }

    async fn load_table(&self, table: Table) -> Result<usize> {
        let dir = self.table_dir(table);
        let mut metas = Vec::new();
        let mut payload_ids = Vec::new();

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()).map(str::to_string),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };

            match ext {
                META_EXT => metas.push((stem, path)),
                PAYLOAD_EXT => payload_ids.push(stem),
                // Leftovers from an interrupted write
                TMP_EXT => {
                    let _ = fs::remove_file(&path).await;
                }
                _ => {}
            }
        }

        let mut index = self.index.write().await;
        let mut loaded = 0;

        for (id, meta_path) in metas {
            let payload_path = self.payload_path(table, &id);
            let meta = match fs::read(&meta_path).await {
                Ok(raw) => serde_json::from_slice::<RecordMeta>(&raw).ok(),
                Err(_) => None,
            };
            let payload_len = fs::metadata(&payload_path).await.ok().map(|m| m.len());

            match (meta, payload_len) {
                (Some(meta), Some(len)) if len == meta.size && Self::record_id(&meta.key) == id => {
                    self.current_size.fetch_add(meta.size, Ordering::Relaxed);
                    index.insert((table, meta.key.clone()), meta);
                    loaded += 1;
                }
                _ => {
                    warn!(table = %table, id = %id, "Discarding unreadable durable record");
                    let _ = fs::remove_file(&meta_path).await;
                    let _ = fs::remove_file(&payload_path).await;
                }
            }
        }

        // Payloads whose metadata never landed
        for id in payload_ids {
            if !self.meta_path(table, &id).exists() {
                debug!(table = %table, id = %id, "Removing orphan payload");
                let _ = fs::remove_file(self.payload_path(table, &id)).await;
            }
        }

        Ok(loaded)
    }

    /// Read a record; expired records are misses even if still on disk
    pub async fn get(&self, table: Table, key: &str) -> Option<StoredBlob> {
        let meta = {
            let index = self.index.read().await;
            index.get(&(table, key.to_string())).cloned()
        };

        let Some(meta) = meta else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if self.is_expired(&meta, self.clock.now()) {
            debug!(table = %table, key = %key, stored_at = %meta.stored_at, "Durable record expired");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let id = Self::record_id(key);
        match fs::read(self.payload_path(table, &id)).await {
            Ok(payload) if payload.len() as u64 == meta.size => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(table = %table, key = %key, "Durable hit");
                Some(StoredBlob {
                    payload,
                    stored_at: meta.stored_at,
                })
            }
            Ok(_) => {
                warn!(table = %table, key = %key, "Durable payload size mismatch, removing entry");
                self.remove(table, key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(table = %table, key = %key, error = %e, "Failed to read durable payload, removing entry");
                self.remove(table, key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Whether a live (non-expired) record exists, without touching counters
    pub async fn contains(&self, table: Table, key: &str) -> bool {
        let now = self.clock.now();
        let index = self.index.read().await;
        index
            .get(&(table, key.to_string()))
            .is_some_and(|meta| !self.is_expired(meta, now))
    }

    /// Store a record, replacing any previous one under the same key
    pub async fn put(&self, table: Table, key: &str, data: &[u8]) -> Result<()> {
        let size = data.len() as u64;
        if size > self.max_size {
            return Err(StoreError::TooLarge {
                size,
                max_size: self.max_size,
            });
        }

        // A replaced record frees its own space first
        self.remove(table, key).await;
        self.evict_if_needed(size).await;

        let id = Self::record_id(key);
        let meta = RecordMeta {
            key: key.to_string(),
            stored_at: self.clock.now(),
            size,
        };

        self.write_atomic(&self.payload_path(table, &id), data).await?;
        self.write_atomic(&self.meta_path(table, &id), &serde_json::to_vec(&meta)?)
            .await?;

        {
            let mut index = self.index.write().await;
            if let Some(previous) = index.insert((table, key.to_string()), meta) {
                self.current_size.fetch_sub(previous.size, Ordering::Relaxed);
            }
        }

        self.current_size.fetch_add(size, Ordering::Relaxed);
        debug!(table = %table, key = %key, size, "Stored durable blob");
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{seq}.{TMP_EXT}"));
        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Evict oldest records until there's room for `new_size` bytes
    async fn evict_if_needed(&self, new_size: u64) {
        let target_size = self.max_size.saturating_sub(new_size);

        loop {
            if self.current_size.load(Ordering::Relaxed) <= target_size {
                break;
            }

            let oldest = {
                let index = self.index.read().await;
                index
                    .iter()
                    .min_by_key(|(_, meta)| meta.stored_at)
                    .map(|((table, key), _)| (*table, key.clone()))
            };

            match oldest {
                Some((table, key)) => {
                    self.remove(table, &key).await;
                    debug!(table = %table, key = %key, "Evicted oldest durable record");
                }
                None => break,
            }
        }
    }

    /// Remove a record; returns whether it existed
    pub async fn remove(&self, table: Table, key: &str) -> bool {
        let meta = {
            let mut index = self.index.write().await;
            index.remove(&(table, key.to_string()))
        };

        let Some(meta) = meta else {
            return false;
        };

        self.current_size.fetch_sub(meta.size, Ordering::Relaxed);
        let id = Self::record_id(key);
        let _ = fs::remove_file(self.meta_path(table, &id)).await;
        let _ = fs::remove_file(self.payload_path(table, &id)).await;
        true
    }

    /// Physically delete every expired record; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<IndexKey> = {
            let index = self.index.read().await;
            index
                .iter()
                .filter(|(_, meta)| self.is_expired(meta, now))
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut removed = 0;
        for (table, key) in expired {
            if self.remove(table, &key).await {
                removed += 1;
            }
        }
        removed
    }

    /// Remove every record in every table
    pub async fn clear(&self) -> Result<()> {
        let mut index = self.index.write().await;
        index.clear();
        self.current_size.store(0, Ordering::Relaxed);

        for table in Table::ALL {
            let dir = self.table_dir(table);
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            fs::create_dir_all(&dir).await?;
        }

        info!(root = ?self.root, "Durable blob store cleared");
        Ok(())
    }

    pub async fn stats(&self) -> StoreStats {
        let index = self.index.read().await;
        StoreStats {
            entries: index.len(),
            total_size: self.current_size.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Spawn a background task that periodically purges expired records
pub fn spawn_expiry_sweep(store: Arc<FileBlobStore>, interval: Duration) -> JoinHandle<()> {
    info!(
        interval_secs = interval.as_secs(),
        "Durable store expiry sweep started"
    );

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = store.purge_expired().await;
            if removed > 0 {
                let stats = store.stats().await;
                debug!(
                    removed,
                    entries = stats.entries,
                    total_size = stats.total_size,
                    "Durable store expiry sweep completed"
                );
            }
        }
    })
}
