//! Request priority and retry configuration

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How urgently a caller needs a blob.
///
/// Interactive paths (an item scrolled into view) use `High`; background
/// warming uses `Low`. Priorities order by urgency, so `High` is the
/// greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    fn urgency(self) -> u8 {
        match self {
            Priority::High => 2,
            Priority::Normal => 1,
            Priority::Low => 0,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.urgency().cmp(&other.urgency())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("Unknown priority: {}", other)),
        }
    }
}

/// Timeouts and backoff for the fetcher
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub high_timeout: Duration,
    pub normal_timeout: Duration,
    pub low_timeout: Duration,
    /// Delay unit for exponential backoff
    pub base_delay: Duration,
    /// Total attempts including the first
    pub max_attempts: u32,
}

impl FetchConfig {
    pub fn timeout_for(&self, priority: Priority) -> Duration {
        match priority {
            Priority::High => self.high_timeout,
            Priority::Normal => self.normal_timeout,
            Priority::Low => self.low_timeout,
        }
    }

    /// Delay after the given number of failed attempts: `base * 2^failures`
    pub fn backoff_after(&self, failures: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(failures)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            high_timeout: Duration::from_secs(8),
            normal_timeout: Duration::from_secs(15),
            low_timeout: Duration::from_secs(30),
            base_delay: Duration::from_millis(500),
            max_attempts: 3,
        }
    }
}

/// A single fetch with its resolved timeout
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub priority: Priority,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, priority: Priority, config: &FetchConfig) -> Self {
        Self {
            url: url.into(),
            priority,
            timeout: config.timeout_for(priority),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_scale_with_priority() {
        let config = FetchConfig::default();
        assert!(config.timeout_for(Priority::High) < config.timeout_for(Priority::Normal));
        assert!(config.timeout_for(Priority::Normal) < config.timeout_for(Priority::Low));
    }

    #[test]
    fn test_backoff_doubles() {
        let config = FetchConfig {
            base_delay: Duration::from_millis(100),
            ..FetchConfig::default()
        };
        assert_eq!(config.backoff_after(1), Duration::from_millis(200));
        assert_eq!(config.backoff_after(2), Duration::from_millis(400));
        assert_eq!(config.backoff_after(3), Duration::from_millis(800));
    }

    #[test]
    fn test_priority_parse_and_display() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(Priority::Low.to_string(), "low");
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_orders_by_urgency() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::Low.max(Priority::High), Priority::High);
    }

    #[test]
    fn test_priority_serialization() {
        let json = serde_json::to_string(&Priority::Normal).unwrap();
        assert_eq!(json, "\"normal\"");
    }

    #[test]
    fn test_fetch_request_resolves_timeout() {
        let config = FetchConfig::default();
        let request = FetchRequest::new("https://cdn.example.com/a.jpg", Priority::Low, &config);
        assert_eq!(request.timeout, config.low_timeout);
    }
}
