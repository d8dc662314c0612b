//! Two-tier media blob cache
//!
//! A bounded in-process memory tier in front of a durable on-disk tier,
//! fed by a retrying network fetcher. Memory eviction uses a weighted
//! access-rate/recency/size score with load-adaptive batch sizes, concurrent
//! lookups for one key are coalesced, and cheap JPEG thumbnails are derived
//! from images and video frames.
//!
//! [`CacheFacade`] is the entry point.

mod coalesce;
mod config;
mod durable;
mod error;
mod eviction;
mod facade;
mod memory;
mod profiler;
mod store;
mod thumbnail;
mod types;

pub use coalesce::{CoalescerStats, RequestCoalescer};
pub use config::{CacheConfig, PreloadConfig, WarmUpConfig};
pub use durable::DurableBlobStore;
pub use error::{CacheError, Result};
pub use eviction::{EvictionFractions, EvictionPolicy, EvictionWeights};
pub use facade::{CacheFacade, CacheFacadeBuilder};
pub use memory::{MemoryBlobStore, MemoryStats};
pub use profiler::{DeviceProfiler, DeviceSignals, DeviceTier, FixedProfiler, SystemProfiler};
pub use store::BlobStore;
pub use thumbnail::{resize_to_jpeg, MediaThumbnailer, ThumbnailDeriver, ThumbnailSettings};
pub use types::{
    CacheEntry, CacheKey, CacheStats, MediaKind, MediaRecord, PreloadReport, StoreBudget,
};

pub use file_blob_cache::{Clock, ManualClock, SystemClock};
pub use media_fetcher::{FetchConfig, FetchError, Priority, Transport};
