//! Single-attempt byte transport

use crate::error::{FetchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "media-cache/0.1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One attempt at retrieving a complete payload.
///
/// Implementations must either return the full body or an error; partial
/// bodies are never surfaced.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Bytes> {
        debug!(url = %url, "Fetching blob");

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let data = response.bytes().await?;
        debug!(url = %url, size = data.len(), "Fetched blob");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::new().is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        let transport = HttpTransport::new().unwrap();
        // Port 9 (discard) on localhost is closed in test environments
        let result = transport.get("http://127.0.0.1:9/blob").await;
        assert!(result.unwrap_err().is_transient());
    }
}
