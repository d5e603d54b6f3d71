//! Candidate listing image retrieval
//!
//! Fetching is behind a trait so tests can rank against in-memory
//! fixtures without a network. The HTTP implementation enforces a body
//! size cap; listing thumbnails past that cap are treated as
//! unfetchable.

use crate::vision::USER_AGENT;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Largest candidate image body we will buffer.
const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("listing has no image url")]
    NoUrl,
    #[error("network error: {0}")]
    Network(String),
    #[error("image fetch returned HTTP {0}")]
    Status(u16),
    #[error("image body exceeds {MAX_IMAGE_BYTES} bytes")]
    TooLarge,
}

/// Retrieves the bytes of one listing image.
#[async_trait]
pub trait ListingImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP fetcher used in production.
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Falls back to the default client when the builder fails; fetches
    /// then surface the underlying failure as `FetchError::Network`.
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl ListingImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.trim().is_empty() {
            return Err(FetchError::NoUrl);
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if body.len() > MAX_IMAGE_BYTES {
            return Err(FetchError::TooLarge);
        }
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blank_url_is_rejected_without_network() {
        let fetcher = HttpImageFetcher::new(1);
        assert_eq!(fetcher.fetch("  ").await.unwrap_err(), FetchError::NoUrl);
    }
}
