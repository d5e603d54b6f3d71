//! Full analysis endpoint

use axum::{extract::State, routing::post, Json, Router};
use base64::Engine as _;
use serde::Deserialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::pipeline::{AnalysisOptions, AnalysisResult};
use crate::AppState;

/// POST /analyze request body
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Base64-encoded photograph of the item
    pub image_base64: String,
    /// Localize the principal subject before analysis
    #[serde(default = "default_intelligent_crop")]
    pub intelligent_crop: bool,
    /// Marketplace category filter, forwarded to the gateway
    #[serde(default)]
    pub category_filter: Option<String>,
    /// Listing-count override for the marketplace search
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_intelligent_crop() -> bool {
    true
}

/// POST /analyze
///
/// Runs the full identify-and-price pipeline over one photograph and
/// returns the analysis result. Fails only for undecodable request
/// bodies and invalid images; every downstream degradation is reported
/// inside the result's summary.
pub async fn run_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalysisResult>> {
    let image_bytes = base64::engine::general_purpose::STANDARD
        .decode(request.image_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("image_base64 is not valid base64: {e}")))?;

    info!(
        bytes = image_bytes.len(),
        intelligent_crop = request.intelligent_crop,
        "Analysis requested"
    );

    let options = AnalysisOptions {
        intelligent_crop: request.intelligent_crop,
        category_filter: request.category_filter,
        limit: request.limit,
    };
    match state
        .analyzer
        .run_complete_analysis(image_bytes, state.gateway.as_ref(), options)
        .await
    {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            *state.last_error.write().await = Some(e.to_string());
            Err(e.into())
        }
    }
}

/// Build analysis routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new().route("/analyze", post(run_analysis))
}
