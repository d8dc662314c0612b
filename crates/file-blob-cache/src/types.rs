//! Store types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical table a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    /// Original blobs keyed by source URL
    Blobs,
    /// Derived thumbnails keyed by URL and size
    Thumbnails,
}

impl Table {
    pub const ALL: [Table; 2] = [Table::Blobs, Table::Thumbnails];

    /// Directory name under the store root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Table::Blobs => "blobs",
            Table::Thumbnails => "thumbs",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Metadata persisted next to each payload file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub size: u64,
}

/// A record read back from the store
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub payload: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

/// Statistics about the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_stats_default() {
        let stats = StoreStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_record_meta_serialization() {
        let meta = RecordMeta {
            key: "https://cdn.example.com/a.jpg".to_string(),
            stored_at: Utc::now(),
            size: 12345,
        };

        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("cdn.example.com"));
        assert!(json.contains("12345"));

        let deserialized: RecordMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, meta);
    }

    #[test]
    fn test_table_dir_names_are_distinct() {
        assert_ne!(Table::Blobs.dir_name(), Table::Thumbnails.dir_name());
        assert_eq!(Table::Thumbnails.to_string(), "thumbs");
    }
}
