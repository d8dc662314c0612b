//! Cache facade
//!
//! The single entry point for blob and thumbnail lookups. Reads go memory,
//! then durable, then network; fresh results populate both tiers. Concurrent
//! lookups for one key share a single load.

use crate::coalesce::RequestCoalescer;
use crate::config::CacheConfig;
use crate::durable::DurableBlobStore;
use crate::error::{CacheError, Result};
use crate::memory::MemoryBlobStore;
use crate::profiler::{DeviceProfiler, SystemProfiler};
use crate::store::BlobStore;
use crate::thumbnail::{MediaThumbnailer, ThumbnailDeriver};
use crate::types::{CacheKey, CacheStats, MediaKind, MediaRecord, PreloadReport, StoreBudget};
use bytes::Bytes;
use file_blob_cache::{Clock, FileBlobStore, SystemClock};
use futures::future::join_all;
use media_fetcher::{Fetcher, HttpTransport, Priority, Transport};
use moka::future::Cache;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Inner {
    config: CacheConfig,
    memory: MemoryBlobStore,
    durable: Arc<dyn BlobStore>,
    fetcher: Fetcher,
    deriver: Arc<dyn ThumbnailDeriver>,
    /// Blob loads, ranked by the most urgent caller waiting on each
    blob_flights: Arc<RequestCoalescer<String, Option<Bytes>, Priority>>,
    thumbnail_flights: Arc<RequestCoalescer<CacheKey, Option<Bytes>>>,
    /// Thumbnails that recently failed to derive
    failed_thumbnails: Cache<CacheKey, ()>,
    sweep: Mutex<Option<JoinHandle<()>>>,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    thumbnail_failures: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let sweep = self.sweep.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = sweep.take() {
            debug!("Stopping expiry sweep");
            handle.abort();
        }
    }
}

/// Builds a [`CacheFacade`], with every collaborator replaceable
pub struct CacheFacadeBuilder {
    config: CacheConfig,
    profiler: Option<Box<dyn DeviceProfiler>>,
    transport: Option<Arc<dyn Transport>>,
    deriver: Option<Arc<dyn ThumbnailDeriver>>,
    durable: Option<Arc<dyn BlobStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CacheFacadeBuilder {
    pub fn profiler(mut self, profiler: impl DeviceProfiler + 'static) -> Self {
        self.profiler = Some(Box::new(profiler));
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn deriver(mut self, deriver: Arc<dyn ThumbnailDeriver>) -> Self {
        self.deriver = Some(deriver);
        self
    }

    /// Use this store as the durable tier instead of opening one on disk
    pub fn durable(mut self, durable: Arc<dyn BlobStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub async fn build(self) -> Result<CacheFacade> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let profiler = self
            .profiler
            .unwrap_or_else(|| Box::new(SystemProfiler));
        let budget = config.resolve_budget(profiler.as_ref());

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let (durable, sweep) = match self.durable {
            Some(durable) => (durable, None),
            None => {
                let store = FileBlobStore::new(
                    config.cache_dir.clone(),
                    config.durable_max_bytes,
                    config.persist_ttl_secs,
                )
                .with_clock(Arc::clone(&clock));
                let opened = DurableBlobStore::open(store).await;
                let sweep = opened.spawn_sweep(config.sweep_interval);
                let durable: Arc<dyn BlobStore> = Arc::new(opened);
                (durable, sweep)
            }
        };

        let deriver = self
            .deriver
            .unwrap_or_else(|| Arc::new(MediaThumbnailer::new(config.thumbnails.clone())));

        let failed_thumbnails = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(config.failed_thumbnail_ttl)
            .build();

        info!(
            max_entries = budget.max_entries,
            max_bytes = budget.max_bytes,
            thumbnail_size = config.thumbnail_size,
            "Media cache ready"
        );

        Ok(CacheFacade {
            inner: Arc::new(Inner {
                memory: MemoryBlobStore::new(budget, config.eviction, clock),
                fetcher: Fetcher::new(transport, config.fetch.clone()),
                config,
                durable,
                deriver,
                blob_flights: Arc::new(RequestCoalescer::new()),
                thumbnail_flights: Arc::new(RequestCoalescer::new()),
                failed_thumbnails,
                sweep: Mutex::new(sweep),
                fetches: AtomicU64::new(0),
                fetch_failures: AtomicU64::new(0),
                thumbnail_failures: AtomicU64::new(0),
            }),
        })
    }
}

/// Two-tier media cache. Clones share the same state.
#[derive(Clone)]
pub struct CacheFacade {
    inner: Arc<Inner>,
}

impl CacheFacade {
    pub fn builder(config: CacheConfig) -> CacheFacadeBuilder {
        CacheFacadeBuilder {
            config,
            profiler: None,
            transport: None,
            deriver: None,
            durable: None,
            clock: None,
        }
    }

    /// Build with the host profiler, HTTP transport and an on-disk durable tier
    pub async fn new(config: CacheConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn budget(&self) -> StoreBudget {
        self.inner.memory.budget()
    }

    /// Get an original blob; `None` once every tier and all retries fail
    pub async fn get_blob(&self, url: &str, priority: Priority) -> Option<Bytes> {
        let key = CacheKey::original(url);
        if let Some(entry) = self.inner.memory.get(&key) {
            return Some(entry.payload);
        }

        let facade = self.clone();
        let owned = url.to_string();
        self.inner
            .blob_flights
            .run_ranked(url.to_string(), priority, move |priority| async move {
                facade.load_blob(owned, priority).await
            })
            .await
            .flatten()
    }

    async fn load_blob(&self, url: String, priority: watch::Receiver<Priority>) -> Option<Bytes> {
        let key = CacheKey::original(&url);
        // A flight that finished just before this one started may have filled it
        if let Some(entry) = self.inner.memory.peek(&key) {
            return Some(entry.payload);
        }

        if let Some(payload) = self.inner.durable.get(&key).await {
            debug!(url = %url, size = payload.len(), "Durable cache hit");
            self.inner.memory.put(key, payload.clone());
            return Some(payload);
        }

        self.inner.fetches.fetch_add(1, Ordering::Relaxed);
        let result = self.inner.fetcher.fetch_watched(&url, priority.clone()).await;
        let priority = *priority.borrow();
        match result {
            Ok(payload) => {
                debug!(url = %url, size = payload.len(), priority = %priority, "Fetched blob");
                self.inner.memory.put(key.clone(), payload.clone());
                self.inner.durable.put(&key, payload.clone()).await;
                Some(payload)
            }
            Err(e) => {
                self.inner.fetch_failures.fetch_add(1, Ordering::Relaxed);
                let err = CacheError::from(e);
                warn!(url = %url, priority = %priority, error = %err, "Blob unavailable");
                None
            }
        }
    }

    /// Get a preview of `url`, sniffing the original to pick image or video.
    ///
    /// Falls back to the original bytes when no preview can be derived.
    pub async fn get_thumbnail(&self, url: &str, target_size: u32) -> Option<Bytes> {
        self.thumbnail(url, target_size, None).await
    }

    /// Get a preview for a media record, preferring its `thumbnail_ref`
    pub async fn get_thumbnail_for(&self, record: &MediaRecord, target_size: u32) -> Option<Bytes> {
        match &record.thumbnail_ref {
            Some(reference) => self.thumbnail(reference, target_size, None).await,
            None => self.thumbnail(&record.url, target_size, record.kind()).await,
        }
    }

    async fn thumbnail(&self, url: &str, target_size: u32, hint: Option<MediaKind>) -> Option<Bytes> {
        let key = CacheKey::thumbnail(url, target_size);
        if let Some(entry) = self.inner.memory.get(&key) {
            return Some(entry.payload);
        }

        if self.inner.failed_thumbnails.get(&key).await.is_some() {
            return self.get_blob(url, Priority::High).await;
        }

        let facade = self.clone();
        let owned = url.to_string();
        self.inner
            .thumbnail_flights
            .run(key, move || async move {
                facade.load_thumbnail(owned, target_size, hint).await
            })
            .await
            .flatten()
    }

    async fn load_thumbnail(&self, url: String, target_size: u32, hint: Option<MediaKind>) -> Option<Bytes> {
        let key = CacheKey::thumbnail(&url, target_size);
        if let Some(entry) = self.inner.memory.peek(&key) {
            return Some(entry.payload);
        }

        if let Some(thumb) = self.inner.durable.get(&key).await {
            self.inner.memory.put(key, thumb.clone());
            return Some(thumb);
        }

        let original = self.get_blob(&url, Priority::High).await?;
        let derived = match hint.or_else(|| MediaKind::sniff(&original)) {
            Some(kind) => {
                self.inner
                    .deriver
                    .derive(kind, original.clone(), target_size)
                    .await
            }
            None => None,
        };

        match derived {
            Some(thumb) => {
                self.inner.memory.put(key.clone(), thumb.clone());
                self.inner.durable.put(&key, thumb.clone()).await;
                Some(thumb)
            }
            None => {
                self.inner.thumbnail_failures.fetch_add(1, Ordering::Relaxed);
                let err = CacheError::Decode(format!("no {}px preview derivable", target_size));
                debug!(url = %url, error = %err, "Serving original in place of thumbnail");
                self.inner.failed_thumbnails.insert(key, ()).await;
                Some(original)
            }
        }
    }

    /// Fetch not-yet-cached blobs in the background.
    ///
    /// The returned handle may be dropped; the preload keeps running.
    pub fn preload(&self, urls: Vec<String>, priority: Priority) -> JoinHandle<PreloadReport> {
        let facade = self.clone();
        tokio::spawn(async move { facade.preload_now(urls, priority).await })
    }

    /// Run a preload to completion on the current task
    pub async fn preload_now(&self, urls: Vec<String>, priority: Priority) -> PreloadReport {
        let mut seen = HashSet::new();
        let unique: Vec<String> = urls.into_iter().filter(|url| seen.insert(url.clone())).collect();

        let mut report = PreloadReport {
            requested: unique.len(),
            ..PreloadReport::default()
        };

        let mut pending = Vec::new();
        for url in unique {
            let key = CacheKey::original(&url);
            if self.inner.memory.contains(&key) || self.inner.durable.contains(&key).await {
                report.already_cached += 1;
            } else {
                pending.push(url);
            }
        }

        let batch_size = self.inner.config.preload.batch_size.max(1);
        let delay = self.inner.config.preload.delay_for(priority);

        for (i, batch) in pending.chunks(batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            let results = join_all(batch.iter().map(|url| self.get_blob(url, priority))).await;
            for result in results {
                if result.is_some() {
                    report.loaded += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        debug!(
            requested = report.requested,
            already_cached = report.already_cached,
            loaded = report.loaded,
            failed = report.failed,
            priority = %priority,
            "Preload finished"
        );
        report
    }

    /// Thumbnail the head of `recent` now, then preload `frequent` in the
    /// background after a grace delay
    pub async fn warm_up(&self, recent: &[MediaRecord], frequent: Vec<MediaRecord>) -> JoinHandle<PreloadReport> {
        let size = self.inner.config.thumbnail_size;
        let head = recent.iter().take(self.inner.config.warmup.recent_head);
        let thumbs = join_all(head.map(|record| self.get_thumbnail_for(record, size))).await;

        info!(
            thumbnails = thumbs.iter().filter(|t| t.is_some()).count(),
            frequent = frequent.len(),
            "Warm-up thumbnails ready"
        );

        let facade = self.clone();
        let grace = self.inner.config.warmup.grace_delay;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let urls = frequent.into_iter().map(|record| record.url).collect();
            facade.preload_now(urls, Priority::Low).await
        })
    }

    /// Empty every tier, including remembered thumbnail failures
    pub async fn clear(&self) {
        self.inner.memory.clear();
        self.inner.durable.clear().await;
        self.inner.failed_thumbnails.invalidate_all();
        info!("Media cache cleared");
    }

    /// Read-only snapshot of cache state
    pub async fn stats(&self) -> CacheStats {
        let memory = self.inner.memory.stats();
        let budget = self.inner.memory.budget();
        let coalesced = self.inner.blob_flights.stats().coalesced_requests
            + self.inner.thumbnail_flights.stats().coalesced_requests;

        CacheStats {
            entries: memory.entries,
            total_bytes: memory.total_bytes,
            average_access_count: memory.average_access_count,
            memory_pressure: memory.pressure,
            max_entries: budget.max_entries,
            max_bytes: budget.max_bytes,
            hits: memory.hits,
            misses: memory.misses,
            evictions: memory.evictions,
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            fetch_failures: self.inner.fetch_failures.load(Ordering::Relaxed),
            coalesced_requests: coalesced,
            thumbnail_failures: self.inner.thumbnail_failures.load(Ordering::Relaxed),
            durable: self.inner.durable.usage().await,
        }
    }

    /// Stop background maintenance
    pub fn shutdown(&self) {
        let sweep = self
            .inner
            .sweep
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = sweep {
            handle.abort();
        }
        info!("Media cache shut down");
    }
}
