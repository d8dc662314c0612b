//! Storage capability shared by the memory and durable tiers

use crate::memory::MemoryBlobStore;
use crate::types::CacheKey;
use async_trait::async_trait;
use bytes::Bytes;
use file_blob_cache::StoreStats;

/// Key/value blob storage.
///
/// Implementations never fail loudly: a store that cannot serve a request
/// reports a miss, and a failed write is logged and dropped.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<Bytes>;

    async fn put(&self, key: &CacheKey, payload: Bytes);

    async fn remove(&self, key: &CacheKey) -> bool;

    async fn contains(&self, key: &CacheKey) -> bool;

    async fn clear(&self);

    /// Occupancy figures, for stores that track them
    async fn usage(&self) -> Option<StoreStats> {
        None
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        MemoryBlobStore::get(self, key).map(|entry| entry.payload)
    }

    async fn put(&self, key: &CacheKey, payload: Bytes) {
        MemoryBlobStore::put(self, key.clone(), payload);
    }

    async fn remove(&self, key: &CacheKey) -> bool {
        MemoryBlobStore::remove(self, key).is_some()
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        MemoryBlobStore::contains(self, key)
    }

    async fn clear(&self) {
        MemoryBlobStore::clear(self)
    }

    async fn usage(&self) -> Option<StoreStats> {
        let stats = self.stats();
        Some(StoreStats {
            entries: stats.entries,
            total_size: stats.total_bytes,
            hits: stats.hits,
            misses: stats.misses,
        })
    }
}
