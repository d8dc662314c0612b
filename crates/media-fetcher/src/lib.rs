//! Media Blob Fetcher
//!
//! Retrieves remote media payloads over HTTP. Each request carries a
//! priority that selects its timeout; transient failures are retried with
//! exponential backoff until the attempt ceiling is reached.

pub mod error;
pub mod fetcher;
pub mod transport;
pub mod types;

pub use error::{FetchError, Result};
pub use fetcher::Fetcher;
pub use transport::{HttpTransport, Transport};
pub use types::{FetchConfig, FetchRequest, Priority};
