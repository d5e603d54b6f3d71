//! Marketplace gateway
//!
//! The marketplace search API is an external collaborator: the pipeline
//! only depends on the [`MarketplaceGateway`] trait, and every upstream
//! problem surfaces as a [`SearchUnavailable`] signal rather than an
//! error type the caller has to unpack. Empty result sets are a normal
//! successful response.

use crate::config::MarketplaceConfig;
use crate::credentials::{StaticTokenProvider, TokenProvider};
use crate::types::CandidateListing;
use crate::vision::USER_AGENT;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The marketplace could not be searched. Carries the reason for the
/// analysis summary; the pipeline continues without comps.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("marketplace search unavailable: {reason}")]
pub struct SearchUnavailable {
    pub reason: String,
}

impl SearchUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Black-box search capability: query text in, candidate listings out.
#[async_trait]
pub trait MarketplaceGateway: Send + Sync {
    async fn search(
        &self,
        query_text: &str,
        category_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateListing>, SearchUnavailable>;
}

/// Gateway backed by an HTTP marketplace search endpoint with bearer
/// authentication.
pub struct HttpMarketplaceGateway {
    client: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpMarketplaceGateway {
    /// Returns None when no endpoint is configured; the caller installs
    /// the [`NullGateway`] instead.
    pub fn from_config(config: &MarketplaceConfig) -> Option<Self> {
        let endpoint = config.endpoint.clone()?;
        let tokens: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new(
            config.bearer_token.clone().unwrap_or_default(),
        ));
        Self::with_token_provider(&endpoint, config.timeout_secs, tokens)
    }

    /// Build with an injected credential collaborator.
    pub fn with_token_provider(
        endpoint: &str,
        timeout_secs: u64,
        tokens: Arc<dyn TokenProvider>,
    ) -> Option<Self> {
        let client = match reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "failed to build marketplace HTTP client");
                return None;
            }
        };
        Some(Self {
            client,
            endpoint: endpoint.to_string(),
            tokens,
        })
    }
}

#[async_trait]
impl MarketplaceGateway for HttpMarketplaceGateway {
    async fn search(
        &self,
        query_text: &str,
        category_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateListing>, SearchUnavailable> {
        let token = self
            .tokens
            .bearer_token()
            .await
            .map_err(|e| SearchUnavailable::new(e.to_string()))?;

        let mut request = self
            .client
            .get(&self.endpoint)
            .bearer_auth(token)
            .query(&[("q", query_text), ("limit", &limit.to_string())]);
        if let Some(category) = category_filter {
            request = request.query(&[("category_ids", category)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SearchUnavailable::new(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchUnavailable::new(format!(
                "marketplace returned HTTP {}",
                status.as_u16()
            )));
        }

        let envelope: SearchEnvelope = response
            .json()
            .await
            .map_err(|e| SearchUnavailable::new(format!("malformed response: {e}")))?;

        Ok(envelope
            .item_summaries
            .into_iter()
            .filter_map(WireListing::into_listing)
            .collect())
    }
}

/// Gateway used when no marketplace endpoint is configured. Every search
/// reports unavailability, so analyses still complete with zero comps.
pub struct NullGateway;

#[async_trait]
impl MarketplaceGateway for NullGateway {
    async fn search(
        &self,
        _query_text: &str,
        _category_filter: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<CandidateListing>, SearchUnavailable> {
        Err(SearchUnavailable::new("no marketplace endpoint configured"))
    }
}

// Wire format of the marketplace search response.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchEnvelope {
    #[serde(default)]
    item_summaries: Vec<WireListing>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireListing {
    #[serde(default)]
    item_id: String,
    #[serde(default)]
    title: String,
    price: Option<WirePrice>,
    image: Option<WireImage>,
    #[serde(default)]
    item_web_url: String,
}

#[derive(Debug, Deserialize)]
struct WirePrice {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireImage {
    image_url: Option<String>,
}

impl WireListing {
    /// Listings without an id or title carry nothing we can rank or
    /// price; drop them.
    fn into_listing(self) -> Option<CandidateListing> {
        if self.item_id.is_empty() || self.title.is_empty() {
            return None;
        }
        let price = self
            .price
            .and_then(|p| p.value)
            .and_then(|v| v.parse::<f64>().ok());
        Some(CandidateListing {
            id: self.item_id,
            title: self.title,
            price,
            image_url: self
                .image
                .and_then(|i| i.image_url)
                .unwrap_or_default(),
            canonical_url: self.item_web_url,
        })
    }
}
