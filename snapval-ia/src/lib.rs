//! snapval-ia library interface
//!
//! Exposes the analysis pipeline and its HTTP facade for integration
//! testing.

pub mod api;
pub mod config;
pub mod credentials;
pub mod crop;
pub mod error;
pub mod experts;
pub mod market;
pub mod pipeline;
pub mod pricing;
pub mod query;
pub mod rerank;
pub mod synthesis;
pub mod types;
pub mod vision;

pub use crate::error::{ApiError, ApiResult};

use crate::config::IaConfig;
use crate::market::{HttpMarketplaceGateway, MarketplaceGateway, NullGateway};
use crate::pipeline::Analyzer;
use axum::Router;
use chrono::{DateTime, Utc};
use snapval_common::events::EventBus;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

/// Events buffered on the bus before slow SSE subscribers lose the
/// oldest.
const EVENT_BUS_CAPACITY: usize = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Pipeline service registry, built once at startup
    pub analyzer: Arc<Analyzer>,
    /// Marketplace search capability used by /analyze
    pub gateway: Arc<dyn MarketplaceGateway>,
    /// Event bus for SSE broadcasting
    pub event_bus: Arc<EventBus>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        analyzer: Arc<Analyzer>,
        gateway: Arc<dyn MarketplaceGateway>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            analyzer,
            gateway,
            event_bus,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Wire the full production state from configuration.
    ///
    /// Without a configured marketplace endpoint the null gateway is
    /// installed: analyses still run, search just reports unavailable.
    pub fn from_config(config: &IaConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
        let analyzer = Arc::new(Analyzer::from_config(config, Arc::clone(&event_bus)));
        let gateway: Arc<dyn MarketplaceGateway> =
            match HttpMarketplaceGateway::from_config(&config.marketplace) {
                Some(gateway) => Arc::new(gateway),
                None => {
                    tracing::warn!(
                        "no marketplace endpoint configured, search will report unavailable"
                    );
                    Arc::new(NullGateway)
                }
            };
        Self::new(analyzer, gateway, event_bus)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::analyze_routes())
        .merge(api::crop_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
        .with_state(state)
}
