//! Core types for the media cache

use bytes::Bytes;
use chrono::{DateTime, Utc};
use file_blob_cache::{StoreStats, Table};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identity of a cached artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// An original blob, keyed by its source URL
    Original { url: String },
    /// A derived preview, keyed by source URL and target edge length
    Thumbnail { url: String, size: u32 },
}

impl CacheKey {
    pub fn original(url: impl Into<String>) -> Self {
        CacheKey::Original { url: url.into() }
    }

    pub fn thumbnail(url: impl Into<String>, size: u32) -> Self {
        CacheKey::Thumbnail {
            url: url.into(),
            size,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            CacheKey::Original { url } | CacheKey::Thumbnail { url, .. } => url,
        }
    }

    /// Durable table this key lives in
    pub fn table(&self) -> Table {
        match self {
            CacheKey::Original { .. } => Table::Blobs,
            CacheKey::Thumbnail { .. } => Table::Thumbnails,
        }
    }

    /// Flat string form used as the durable record key
    pub fn storage_key(&self) -> String {
        match self {
            CacheKey::Original { url } => url.clone(),
            CacheKey::Thumbnail { url, size } => format!("{url}#thumb={size}"),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// A cached payload plus access bookkeeping.
///
/// The payload is immutable once written; clones share the same buffer.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Bytes,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(payload: Bytes, now: DateTime<Utc>) -> Self {
        Self {
            size_bytes: payload.len() as u64,
            payload,
            created_at: now,
            last_access_at: now,
            access_count: 0,
        }
    }

    /// Record an access; `last_access_at` never moves backwards
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access_at = self.last_access_at.max(now);
        self.access_count += 1;
    }
}

/// Capacity of the in-memory tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreBudget {
    pub max_entries: usize,
    pub max_bytes: u64,
}

impl StoreBudget {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            max_entries,
            max_bytes,
        }
    }

    pub fn allows(&self, entries: usize, bytes: u64) -> bool {
        entries <= self.max_entries && bytes <= self.max_bytes
    }
}

/// Broad category of a media payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        let top = mime.split('/').next()?.trim().to_ascii_lowercase();
        match top.as_str() {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// Guess the kind from leading bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if image::guess_format(bytes).is_ok() {
            return Some(MediaKind::Image);
        }

        let is_iso_bmff = bytes.len() >= 12 && &bytes[4..8] == b"ftyp";
        let is_matroska = bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]);
        let is_avi = bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"AVI ";
        if is_iso_bmff || is_matroska || is_avi {
            return Some(MediaKind::Video);
        }

        None
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => f.write_str("image"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// A media item as supplied by the record provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: String,
    pub url: String,
    pub mime_type: String,
    pub history_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_ref: Option<String>,
}

impl MediaRecord {
    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime(&self.mime_type)
    }
}

/// Outcome of a preload batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadReport {
    pub requested: usize,
    pub already_cached: usize,
    pub loaded: usize,
    pub failed: usize,
}

/// Read-only snapshot of cache state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub average_access_count: f64,
    /// Fraction of the byte budget in use
    pub memory_pressure: f64,
    pub max_entries: usize,
    pub max_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub coalesced_requests: u64,
    pub thumbnail_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable: Option<StoreStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_storage_keys_are_distinct() {
        let url = "https://cdn.example.com/a.jpg";
        let original = CacheKey::original(url);
        let small = CacheKey::thumbnail(url, 200);
        let large = CacheKey::thumbnail(url, 400);

        assert_eq!(original.storage_key(), url);
        assert_ne!(small.storage_key(), large.storage_key());
        assert_eq!(small.url(), url);
        assert_eq!(original.table(), Table::Blobs);
        assert_eq!(small.table(), Table::Thumbnails);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let now = Utc::now();
        let mut entry = CacheEntry::new(Bytes::from_static(b"abc"), now);
        assert_eq!(entry.size_bytes, 3);

        entry.touch(now - chrono::Duration::minutes(5));
        assert_eq!(entry.last_access_at, now);
        assert_eq!(entry.access_count, 1);

        entry.touch(now + chrono::Duration::minutes(1));
        assert_eq!(entry.last_access_at, now + chrono::Duration::minutes(1));
    }

    #[test]
    fn test_media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/jpeg"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("VIDEO/mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("application/pdf"), None);
    }

    #[test]
    fn test_media_kind_sniff() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(MediaKind::sniff(&png_header), Some(MediaKind::Image));

        let mp4_header = [0, 0, 0, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm'];
        assert_eq!(MediaKind::sniff(&mp4_header), Some(MediaKind::Video));

        assert_eq!(MediaKind::sniff(b"plain text"), None);
    }

    #[test]
    fn test_media_record_deserialization() {
        let json = r#"{
            "id": "m1",
            "url": "https://cdn.example.com/m1.mp4",
            "mimeType": "video/mp4",
            "historyId": "h9"
        }"#;

        let record: MediaRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.history_id, "h9");
        assert_eq!(record.thumbnail_ref, None);
        assert_eq!(record.kind(), Some(MediaKind::Video));
    }

    #[test]
    fn test_budget_allows() {
        let budget = StoreBudget::new(2, 100);
        assert!(budget.allows(2, 100));
        assert!(!budget.allows(3, 10));
        assert!(!budget.allows(1, 101));
    }

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert!(stats.durable.is_none());
    }
}
