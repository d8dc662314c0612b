//! Durable tier backed by the file blob store
//!
//! If the store cannot be opened, the tier degrades to a no-op: every read
//! is a miss and every write is dropped. The cache keeps working from memory
//! and the network.

use crate::error::CacheError;
use crate::store::BlobStore;
use crate::types::CacheKey;
use async_trait::async_trait;
use bytes::Bytes;
use file_blob_cache::{spawn_expiry_sweep, FileBlobStore, StoreStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct DurableBlobStore {
    inner: Option<Arc<FileBlobStore>>,
}

impl DurableBlobStore {
    /// Open the store, degrading to a disabled tier on failure
    pub async fn open(store: FileBlobStore) -> Self {
        match store.open().await {
            Ok(()) => Self {
                inner: Some(Arc::new(store)),
            },
            Err(e) => {
                let err = CacheError::DurableStoreUnavailable(e);
                warn!(root = ?store.root(), error = %err, "Continuing without durable cache");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_some()
    }

    /// Start the periodic expiry sweep, if the store is available
    pub fn spawn_sweep(&self, interval: Duration) -> Option<JoinHandle<()>> {
        self.inner
            .as_ref()
            .map(|store| spawn_expiry_sweep(Arc::clone(store), interval))
    }
}

#[async_trait]
impl BlobStore for DurableBlobStore {
    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let store = self.inner.as_ref()?;
        store
            .get(key.table(), &key.storage_key())
            .await
            .map(|blob| Bytes::from(blob.payload))
    }

    async fn put(&self, key: &CacheKey, payload: Bytes) {
        let Some(store) = &self.inner else {
            return;
        };
        if let Err(e) = store.put(key.table(), &key.storage_key(), &payload).await {
            warn!(key = %key, error = %e, "Failed to persist blob");
        }
    }

    async fn remove(&self, key: &CacheKey) -> bool {
        match &self.inner {
            Some(store) => store.remove(key.table(), &key.storage_key()).await,
            None => false,
        }
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        match &self.inner {
            Some(store) => store.contains(key.table(), &key.storage_key()).await,
            None => false,
        }
    }

    async fn clear(&self) {
        let Some(store) = &self.inner else {
            return;
        };
        match store.clear().await {
            Ok(()) => info!("Durable cache cleared"),
            Err(e) => warn!(error = %e, "Failed to clear durable cache"),
        }
    }

    async fn usage(&self) -> Option<StoreStats> {
        match &self.inner {
            Some(store) => Some(store.stats().await),
            None => None,
        }
    }
}
