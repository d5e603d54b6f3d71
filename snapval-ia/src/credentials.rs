//! Marketplace credential collaborator
//!
//! Token lifecycle management (refresh, OAuth dance) lives outside this
//! service; the pipeline only needs something that yields a valid bearer
//! token on demand.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CredentialError {
    #[error("no marketplace credential configured")]
    Missing,
    #[error("credential provider failed: {0}")]
    Provider(String),
}

/// Yields a currently-valid bearer token for marketplace calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, CredentialError>;
}

/// Fixed token from configuration. The token is assumed valid for the
/// process lifetime; rotation means restarting with new config.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        if self.token.trim().is_empty() {
            return Err(CredentialError::Missing);
        }
        Ok(self.token.clone())
    }
}
