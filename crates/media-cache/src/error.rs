//! Error types for the media cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    /// Fetch failed after retries
    Network(media_fetcher::FetchError),
    /// Thumbnail derivation failed
    Decode(String),
    /// Persistence layer disabled or failed to initialize
    DurableStoreUnavailable(file_blob_cache::StoreError),
    /// Memory tier exceeded its budget; always a defect
    BudgetViolation {
        entries: usize,
        max_entries: usize,
        bytes: u64,
        max_bytes: u64,
    },
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Network(err) => write!(f, "Network error: {}", err),
            CacheError::Decode(msg) => write!(f, "Decode error: {}", msg),
            CacheError::DurableStoreUnavailable(err) => {
                write!(f, "Durable store unavailable: {}", err)
            }
            CacheError::BudgetViolation {
                entries,
                max_entries,
                bytes,
                max_bytes,
            } => write!(
                f,
                "Memory budget violated: {}/{} entries, {}/{} bytes",
                entries, max_entries, bytes, max_bytes
            ),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Network(err) => Some(err),
            CacheError::DurableStoreUnavailable(err) => Some(err),
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<media_fetcher::FetchError> for CacheError {
    fn from(err: media_fetcher::FetchError) -> Self {
        CacheError::Network(err)
    }
}

impl From<file_blob_cache::StoreError> for CacheError {
    fn from(err: file_blob_cache::StoreError) -> Self {
        CacheError::DurableStoreUnavailable(err)
    }
}

impl From<image::ImageError> for CacheError {
    fn from(err: image::ImageError) -> Self {
        CacheError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Config(err.to_string())
    }
}

impl From<tracing_subscriber::filter::ParseError> for CacheError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        CacheError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = CacheError::Decode("unsupported format".to_string());
        assert_eq!(format!("{}", err), "Decode error: unsupported format");
    }

    #[test]
    fn test_network_error_display() {
        let err = CacheError::Network(media_fetcher::FetchError::Status(404));
        assert!(format!("{}", err).contains("status 404"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_budget_violation_display() {
        let err = CacheError::BudgetViolation {
            entries: 11,
            max_entries: 10,
            bytes: 500,
            max_bytes: 1000,
        };
        assert_eq!(
            format!("{}", err),
            "Memory budget violated: 11/10 entries, 500/1000 bytes"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = CacheError::Config("missing manifest".to_string());
        assert_eq!(format!("{}", err), "Configuration error: missing manifest");
    }

    #[test]
    fn test_error_is_debug() {
        let err = CacheError::Decode("test".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("Decode"));
    }
}
