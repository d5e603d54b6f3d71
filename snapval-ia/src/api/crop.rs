//! Standalone crop preview endpoint

use axum::{extract::State, routing::post, Json, Router};
use base64::Engine as _;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::pipeline::CropPreview;
use crate::AppState;

/// POST /crop request body
#[derive(Debug, Deserialize)]
pub struct CropRequest {
    /// Base64-encoded photograph
    pub image_base64: String,
}

/// POST /crop
///
/// Runs subject localization alone and returns the cropped image,
/// without dispatching experts or searching the marketplace. Useful for
/// previewing what the full analysis would operate on.
pub async fn crop_preview(
    State(state): State<AppState>,
    Json(request): Json<CropRequest>,
) -> ApiResult<Json<CropPreview>> {
    let image_bytes = base64::engine::general_purpose::STANDARD
        .decode(request.image_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("image_base64 is not valid base64: {e}")))?;

    match state.analyzer.intelligent_crop(image_bytes).await {
        Ok(preview) => Ok(Json(preview)),
        Err(e) => {
            *state.last_error.write().await = Some(e.to_string());
            Err(e.into())
        }
    }
}

/// Build crop routes
pub fn crop_routes() -> Router<AppState> {
    Router::new().route("/crop", post(crop_preview))
}
