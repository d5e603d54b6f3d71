//! Shared vision annotation client
//!
//! One HTTP client serves all five expert adapters plus the primary crop
//! localizer; each call requests a single annotation feature. The client
//! is rate limited toward the upstream service and carries its own
//! request timeout.
//!
//! Construction requires a configured API key. `VisionClientCache` defers
//! construction to first use and pins a failure as "permanently
//! unavailable" for the process lifetime, so a missing credential degrades
//! the affected experts instead of failing requests.

use crate::config::{is_valid_key, VisionConfig};
use crate::types::{ExpertError, RawImage};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub const USER_AGENT: &str = "snapval/0.1.0 (item analysis)";

/// Cap on error-body text carried into `ExpertError::Api`.
const MAX_ERROR_BODY: usize = 200;

/// Annotation feature requested from the vision service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionFeature {
    WebDetection,
    LabelDetection,
    ObjectLocalization,
    TextDetection,
    ImageProperties,
}

impl VisionFeature {
    /// Wire name of the feature in the annotate request.
    pub fn request_type(&self) -> &'static str {
        match self {
            VisionFeature::WebDetection => "WEB_DETECTION",
            VisionFeature::LabelDetection => "LABEL_DETECTION",
            VisionFeature::ObjectLocalization => "OBJECT_LOCALIZATION",
            VisionFeature::TextDetection => "TEXT_DETECTION",
            VisionFeature::ImageProperties => "IMAGE_PROPERTIES",
        }
    }
}

/// HTTP client for the vision annotation endpoint.
pub struct VisionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: u32,
    timeout_ms: u64,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl VisionClient {
    /// Build the client. Fails when no usable API key is configured or
    /// the HTTP client cannot be constructed.
    pub fn new(config: &VisionConfig) -> Result<Self, ExpertError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| is_valid_key(k))
            .ok_or_else(|| {
                ExpertError::NotAvailable("vision API key not configured".to_string())
            })?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExpertError::NotAvailable(format!("HTTP client build failed: {}", e)))?;

        // Safe: max(1) is always non-zero
        let quota = governor::Quota::per_second(
            std::num::NonZeroU32::new(config.requests_per_second.max(1)).unwrap(),
        );
        let rate_limiter = governor::RateLimiter::direct(quota);

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            max_results: config.max_results,
            timeout_ms: config.timeout_secs * 1000,
            rate_limiter,
        })
    }

    /// Run one annotation feature against the image.
    pub async fn annotate(
        &self,
        image: &RawImage,
        feature: VisionFeature,
    ) -> Result<AnnotateResponse, ExpertError> {
        // Rate limit outbound API calls
        self.rate_limiter.until_ready().await;

        debug!(feature = feature.request_type(), bytes = image.len(), "Vision annotate call");

        let body = serde_json::json!({
            "requests": [{
                "image": { "content": image.to_base64() },
                "features": [{
                    "type": feature.request_type(),
                    "maxResults": self.max_results,
                }],
            }]
        });

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExpertError::Timeout {
                        waited_ms: self.timeout_ms,
                    }
                } else {
                    ExpertError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExpertError::Api {
                status: status.as_u16(),
                message: truncate(&message, MAX_ERROR_BODY),
            });
        }

        let envelope: AnnotateEnvelope = response
            .json()
            .await
            .map_err(|e| ExpertError::Parse(format!("annotate response: {}", e)))?;

        let first = envelope
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| ExpertError::Parse("empty responses array".to_string()))?;

        // Per-image errors arrive with HTTP 200 and an embedded status
        if let Some(err) = first.error {
            return Err(ExpertError::Api {
                status: err.code.unwrap_or(0) as u16,
                message: err.message.unwrap_or_else(|| "unspecified".to_string()),
            });
        }

        Ok(first)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

// ============================================================================
// Lazy process-wide cache
// ============================================================================

/// Lazily-constructed, process-wide vision client handle.
///
/// The first `get` attempts construction; on failure the cache stores
/// `None` permanently and every later call gets
/// `ExpertError::NotAvailable` without retrying construction.
pub struct VisionClientCache {
    config: VisionConfig,
    cell: OnceCell<Option<Arc<VisionClient>>>,
}

impl VisionClientCache {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            config,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<VisionClient>, ExpertError> {
        let slot = self
            .cell
            .get_or_init(|| async {
                match VisionClient::new(&self.config) {
                    Ok(client) => Some(Arc::new(client)),
                    Err(e) => {
                        warn!(error = %e, "Vision client unavailable for process lifetime");
                        None
                    }
                }
            })
            .await;

        slot.clone().ok_or_else(|| {
            ExpertError::NotAvailable("vision client construction failed".to_string())
        })
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct AnnotateEnvelope {
    #[serde(default)]
    responses: Vec<AnnotateResponse>,
}

/// One image's annotation payload. Fields outside the requested feature
/// are absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotateResponse {
    pub web_detection: Option<WebDetection>,
    pub label_annotations: Option<Vec<RawLabel>>,
    pub localized_object_annotations: Option<Vec<RawObject>>,
    pub full_text_annotation: Option<RawFullText>,
    pub text_annotations: Option<Vec<RawText>>,
    pub image_properties_annotation: Option<RawImageProperties>,
    pub error: Option<RawStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebDetection {
    pub web_entities: Option<Vec<RawWebEntity>>,
    pub best_guess_labels: Option<Vec<RawBestGuess>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWebEntity {
    pub description: Option<String>,
    pub score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RawBestGuess {
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct RawLabel {
    pub description: String,
    pub score: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawObject {
    pub name: String,
    pub score: Option<f64>,
    pub bounding_poly: Option<RawBoundingPoly>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBoundingPoly {
    pub normalized_vertices: Option<Vec<RawVertex>>,
}

impl RawBoundingPoly {
    /// Axis-aligned normalized box enclosing the polygon vertices.
    /// `None` when vertices are missing or enclose no area.
    pub fn to_normalized_box(&self) -> Option<crate::types::NormalizedBox> {
        let vertices = self.normalized_vertices.as_ref()?;
        if vertices.is_empty() {
            return None;
        }

        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        for v in vertices {
            // Omitted coordinates are zero on the wire
            let x = v.x.unwrap_or(0.0);
            let y = v.y.unwrap_or(0.0);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let w = max_x - min_x;
        let h = max_y - min_y;
        if w <= 0.0 || h <= 0.0 {
            return None;
        }
        Some(crate::types::NormalizedBox {
            x: min_x,
            y: min_y,
            w,
            h,
        })
    }
}

/// Normalized vertex in [0,1]; the service omits zero-valued coordinates.
#[derive(Debug, Deserialize)]
pub struct RawVertex {
    pub x: Option<f64>,
    pub y: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RawFullText {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct RawText {
    pub description: String,
    pub locale: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawImageProperties {
    pub dominant_colors: Option<RawDominantColors>,
}

#[derive(Debug, Deserialize)]
pub struct RawDominantColors {
    #[serde(default)]
    pub colors: Vec<RawColorInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawColorInfo {
    pub color: RawColor,
    pub score: Option<f64>,
    pub pixel_fraction: Option<f64>,
}

/// RGB channels as floats 0-255; omitted channels are zero.
#[derive(Debug, Deserialize)]
pub struct RawColor {
    pub red: Option<f64>,
    pub green: Option<f64>,
    pub blue: Option<f64>,
}

/// Embedded per-image error status.
#[derive(Debug, Deserialize)]
pub struct RawStatus {
    pub code: Option<i64>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_request_types() {
        assert_eq!(VisionFeature::WebDetection.request_type(), "WEB_DETECTION");
        assert_eq!(VisionFeature::LabelDetection.request_type(), "LABEL_DETECTION");
        assert_eq!(
            VisionFeature::ObjectLocalization.request_type(),
            "OBJECT_LOCALIZATION"
        );
        assert_eq!(VisionFeature::TextDetection.request_type(), "TEXT_DETECTION");
        assert_eq!(VisionFeature::ImageProperties.request_type(), "IMAGE_PROPERTIES");
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = VisionConfig::default(); // no key
        let result = VisionClient::new(&config);
        assert!(matches!(result, Err(ExpertError::NotAvailable(_))));
    }

    #[test]
    fn test_client_rejects_blank_api_key() {
        let config = VisionConfig {
            api_key: Some("   ".to_string()),
            ..VisionConfig::default()
        };
        assert!(matches!(
            VisionClient::new(&config),
            Err(ExpertError::NotAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_pins_unavailability() {
        let cache = VisionClientCache::new(VisionConfig::default());

        let first = cache.get().await;
        assert!(matches!(first, Err(ExpertError::NotAvailable(_))));

        // Second call must not retry construction into a different answer
        let second = cache.get().await;
        assert!(matches!(second, Err(ExpertError::NotAvailable(_))));
    }

    #[tokio::test]
    async fn test_cache_returns_shared_client_when_configured() {
        let config = VisionConfig {
            api_key: Some("test-key".to_string()),
            ..VisionConfig::default()
        };
        let cache = VisionClientCache::new(config);

        let a = cache.get().await.expect("client");
        let b = cache.get().await.expect("client");
        assert!(Arc::ptr_eq(&a, &b), "cache must hand out the same client");
    }

    #[test]
    fn test_annotate_response_parses_labels() {
        let json = r#"{
            "responses": [{
                "labelAnnotations": [
                    {"mid": "/m/01n5jq", "description": "Polo shirt", "score": 0.94, "topicality": 0.94},
                    {"description": "Cotton", "score": 0.81}
                ]
            }]
        }"#;

        let envelope: AnnotateEnvelope = serde_json::from_str(json).expect("parse");
        let labels = envelope.responses[0]
            .label_annotations
            .as_ref()
            .expect("labels");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].description, "Polo shirt");
        assert_eq!(labels[1].score, Some(0.81));
    }

    #[test]
    fn test_annotate_response_parses_objects_with_omitted_vertices() {
        let json = r#"{
            "responses": [{
                "localizedObjectAnnotations": [{
                    "name": "Shirt",
                    "score": 0.88,
                    "boundingPoly": {
                        "normalizedVertices": [
                            {}, {"x": 0.9}, {"x": 0.9, "y": 0.95}, {"y": 0.95}
                        ]
                    }
                }]
            }]
        }"#;

        let envelope: AnnotateEnvelope = serde_json::from_str(json).expect("parse");
        let objects = envelope.responses[0]
            .localized_object_annotations
            .as_ref()
            .expect("objects");
        let vertices = objects[0]
            .bounding_poly
            .as_ref()
            .and_then(|p| p.normalized_vertices.as_ref())
            .expect("vertices");
        assert_eq!(vertices.len(), 4);
        assert_eq!(vertices[0].x, None); // omitted zero
        assert_eq!(vertices[1].x, Some(0.9));

        let bbox = objects[0]
            .bounding_poly
            .as_ref()
            .and_then(|p| p.to_normalized_box())
            .expect("box");
        assert!((bbox.x - 0.0).abs() < 1e-9);
        assert!((bbox.w - 0.9).abs() < 1e-9);
        assert!((bbox.h - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_bounding_poly_without_area_is_none() {
        let poly = RawBoundingPoly {
            normalized_vertices: Some(vec![
                RawVertex { x: Some(0.5), y: Some(0.5) },
                RawVertex { x: Some(0.5), y: Some(0.5) },
            ]),
        };
        assert!(poly.to_normalized_box().is_none());

        let empty = RawBoundingPoly {
            normalized_vertices: None,
        };
        assert!(empty.to_normalized_box().is_none());
    }

    #[test]
    fn test_annotate_response_parses_embedded_error() {
        let json = r#"{
            "responses": [{
                "error": {"code": 7, "message": "Permission denied"}
            }]
        }"#;

        let envelope: AnnotateEnvelope = serde_json::from_str(json).expect("parse");
        let error = envelope.responses[0].error.as_ref().expect("error");
        assert_eq!(error.code, Some(7));
        assert_eq!(error.message.as_deref(), Some("Permission denied"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "héllo wörld, this is a long error body";
        let t = truncate(s, 10);
        assert!(t.chars().count() <= 11); // 10 bytes worth + ellipsis
        assert!(t.ends_with('…'));
        assert_eq!(truncate("short", 10), "short");
    }
}
