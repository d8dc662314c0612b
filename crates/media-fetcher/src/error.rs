//! Error types for the media fetcher

use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum FetchError {
    InvalidUrl(String),
    Http(Box<reqwest::Error>),
    Status(u16),
    Timeout(Duration),
    Exhausted {
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Http(_) | FetchError::Status(_) | FetchError::Timeout(_)
        )
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            FetchError::Http(err) => write!(f, "HTTP error: {}", err),
            FetchError::Status(code) => write!(f, "Server returned status {}", code),
            FetchError::Timeout(after) => write!(f, "Request timed out after {:?}", after),
            FetchError::Exhausted { attempts, last } => {
                write!(f, "Gave up after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Http(err) => Some(err.as_ref()),
            FetchError::Exhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http(Box::new(err))
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        FetchError::InvalidUrl(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
