//! Error types for the durable blob store

use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    Io(Box<std::io::Error>),
    Metadata(String),
    TooLarge { size: u64, max_size: u64 },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "IO error: {}", err),
            StoreError::Metadata(msg) => write!(f, "Metadata error: {}", msg),
            StoreError::TooLarge { size, max_size } => write!(
                f,
                "Blob of {} bytes exceeds store capacity of {} bytes",
                size, max_size
            ),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Metadata(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_large_display() {
        let err = StoreError::TooLarge {
            size: 30,
            max_size: 20,
        };
        assert_eq!(
            format!("{}", err),
            "Blob of 30 bytes exceeds store capacity of 20 bytes"
        );
    }

    #[test]
    fn test_io_error_has_source() {
        let err: StoreError = std::io::Error::other("disk full").into();
        assert!(format!("{}", err).contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
