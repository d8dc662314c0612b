//! File-based durable blob store
//!
//! Stores binary blobs on disk in named tables with an in-memory index that
//! is rebuilt from on-disk metadata at open, so entries survive restarts.
//! Records older than the expiry horizon read as misses and are physically
//! removed by a periodic sweep; a size cap evicts the oldest records first.

mod cache;
mod clock;
mod error;
mod types;

pub use cache::{spawn_expiry_sweep, FileBlobStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, StoreError};
pub use types::{RecordMeta, StoreStats, StoredBlob, Table};
