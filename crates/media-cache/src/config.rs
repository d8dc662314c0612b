use crate::eviction::EvictionPolicy;
use crate::profiler::DeviceProfiler;
use crate::thumbnail::ThumbnailSettings;
use crate::types::StoreBudget;
use media_fetcher::{FetchConfig, Priority};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Batching for background preloads
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadConfig {
    pub batch_size: usize,
    pub high_delay: Duration,
    pub normal_delay: Duration,
    pub low_delay: Duration,
}

impl PreloadConfig {
    /// Pause between batches; lower priorities yield more
    pub fn delay_for(&self, priority: Priority) -> Duration {
        match priority {
            Priority::High => self.high_delay,
            Priority::Normal => self.normal_delay,
            Priority::Low => self.low_delay,
        }
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            high_delay: Duration::from_millis(50),
            normal_delay: Duration::from_millis(150),
            low_delay: Duration::from_millis(400),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WarmUpConfig {
    /// Recent items thumbnailed up front
    pub recent_head: usize,
    /// Wait before preloading frequent items
    pub grace_delay: Duration,
}

impl Default for WarmUpConfig {
    fn default() -> Self {
        Self {
            recent_head: 6,
            grace_delay: Duration::from_secs(2),
        }
    }
}

/// Cache configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    /// Durable expiry horizon
    pub persist_ttl_secs: u64,
    pub durable_max_bytes: u64,
    /// Overrides for the profiled memory budget
    pub max_entries: Option<usize>,
    pub max_bytes: Option<u64>,
    pub thumbnail_size: u32,
    pub fetch: FetchConfig,
    pub eviction: EvictionPolicy,
    pub preload: PreloadConfig,
    pub warmup: WarmUpConfig,
    pub thumbnails: ThumbnailSettings,
    pub sweep_interval: Duration,
    /// How long a failed derivation is remembered
    pub failed_thumbnail_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/media"),
            persist_ttl_secs: 7 * 24 * 60 * 60,
            durable_max_bytes: 1024 * 1024 * 1024,
            max_entries: None,
            max_bytes: None,
            thumbnail_size: 200,
            fetch: FetchConfig::default(),
            eviction: EvictionPolicy::default(),
            preload: PreloadConfig::default(),
            warmup: WarmUpConfig::default(),
            thumbnails: ThumbnailSettings::default(),
            sweep_interval: Duration::from_secs(60 * 60),
            failed_thumbnail_ttl: Duration::from_secs(10 * 60),
        }
    }
}

impl CacheConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        let cache_dir = lookup("MEDIA_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let persist_ttl_secs = parsed("MEDIA_CACHE_TTL_SECS").unwrap_or(defaults.persist_ttl_secs);

        let durable_max_bytes =
            parsed("MEDIA_CACHE_DURABLE_MAX_BYTES").unwrap_or(defaults.durable_max_bytes);

        let max_entries = parsed("MEDIA_CACHE_MAX_ENTRIES").map(|n| n as usize);
        let max_bytes = parsed("MEDIA_CACHE_MAX_BYTES");

        let thumbnail_size = parsed("MEDIA_CACHE_THUMBNAIL_SIZE")
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.thumbnail_size);

        let mut fetch = defaults.fetch;
        if let Some(ms) = parsed("FETCH_BASE_DELAY_MS") {
            fetch.base_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = parsed("FETCH_MAX_ATTEMPTS").and_then(|n| u32::try_from(n).ok()) {
            fetch.max_attempts = attempts.max(1);
        }

        let mut thumbnails = defaults.thumbnails;
        if let Some(path) = lookup("FFMPEG_PATH") {
            thumbnails.ffmpeg_path = path;
        }

        Self {
            cache_dir,
            persist_ttl_secs,
            durable_max_bytes,
            max_entries,
            max_bytes,
            thumbnail_size,
            fetch,
            thumbnails,
            ..defaults
        }
    }

    /// Memory budget from the profiler, with any explicit overrides applied
    pub fn resolve_budget(&self, profiler: &dyn DeviceProfiler) -> StoreBudget {
        let profiled = profiler.budget();
        StoreBudget::new(
            self.max_entries.unwrap_or(profiled.max_entries),
            self.max_bytes.unwrap_or(profiled.max_bytes),
        )
    }
}
