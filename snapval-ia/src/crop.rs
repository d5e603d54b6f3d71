//! Subject cropping
//!
//! Locates the principal object in the frame and produces a tightly
//! cropped image. Two localization tiers: the vision object localizer
//! first, then the standalone region-detector service. When neither
//! yields a usable box (or both are unavailable) the original image
//! passes through; cropping never fails a request.

use crate::config::DetectorConfig;
use crate::types::{CropResult, CropSource, ExpertError, NormalizedBox, RawImage, Rect};
use crate::vision::{VisionClientCache, VisionFeature};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One localization tier. Implementations report which [`CropSource`]
/// their boxes are attributed to.
#[async_trait]
pub trait SubjectLocator: Send + Sync {
    fn source(&self) -> CropSource;

    /// Find the principal subject's bounding box, `Ok(None)` when the
    /// tier is reachable but sees no subject.
    async fn locate(&self, image: &RawImage) -> Result<Option<NormalizedBox>, ExpertError>;
}

pub struct Cropper {
    tiers: Vec<Arc<dyn SubjectLocator>>,
}

impl Cropper {
    pub fn new(vision: Arc<VisionClientCache>, detector_config: &DetectorConfig) -> Self {
        let mut tiers: Vec<Arc<dyn SubjectLocator>> = vec![Arc::new(VisionLocalizer { vision })];
        if let Some(detector) = RegionDetectorClient::from_config(detector_config) {
            tiers.push(Arc::new(detector));
        }
        Self { tiers }
    }

    /// Assemble from explicit locator tiers, consulted in order.
    pub fn from_tiers(tiers: Vec<Arc<dyn SubjectLocator>>) -> Self {
        Self { tiers }
    }

    /// Locate and crop the principal subject.
    ///
    /// Tier order: object localizer, region detector, passthrough. Every
    /// failure mode inside a tier (unavailable client, timeout, no box,
    /// undecodable image) falls to the next tier.
    pub async fn crop(&self, image: &RawImage) -> CropResult {
        for tier in &self.tiers {
            match tier.locate(image).await {
                Ok(Some(bbox)) => {
                    if let Some((cropped, rect)) = crop_to_box(image, bbox) {
                        debug!(source = %tier.source(), ?rect, "Subject cropped");
                        return CropResult {
                            cropped_image: cropped,
                            source_detector: tier.source(),
                            bounding_box: Some(rect),
                        };
                    }
                }
                Ok(None) => debug!(source = %tier.source(), "No subject found"),
                Err(e) => {
                    warn!(source = %tier.source(), error = %e, "Locator unavailable, trying next tier")
                }
            }
        }

        CropResult::passthrough(image.clone())
    }
}

/// Primary tier: the vision service's object localizer.
struct VisionLocalizer {
    vision: Arc<VisionClientCache>,
}

#[async_trait]
impl SubjectLocator for VisionLocalizer {
    fn source(&self) -> CropSource {
        CropSource::ObjectLocalizer
    }

    async fn locate(&self, image: &RawImage) -> Result<Option<NormalizedBox>, ExpertError> {
        let client = self.vision.get().await?;
        let response = client
            .annotate(image, VisionFeature::ObjectLocalization)
            .await?;

        let mut objects = response.localized_object_annotations.unwrap_or_default();
        objects.sort_by(|a, b| {
            b.score
                .unwrap_or(0.0)
                .partial_cmp(&a.score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(objects
            .iter()
            .find_map(|o| o.bounding_poly.as_ref().and_then(|p| p.to_normalized_box())))
    }
}

/// Decode, crop to the clamped pixel box, and re-encode as PNG.
/// `None` when the image cannot be decoded or the box has no area.
fn crop_to_box(image: &RawImage, bbox: NormalizedBox) -> Option<(RawImage, Rect)> {
    let decoded = match image::load_from_memory(image.bytes()) {
        Ok(img) => img,
        Err(e) => {
            warn!(error = %e, "Cannot decode image for cropping");
            return None;
        }
    };

    use image::GenericImageView;
    let (width, height) = decoded.dimensions();
    let rect = bbox.to_pixel_rect(width, height)?;

    let cropped = decoded.crop_imm(rect.x, rect.y, rect.w, rect.h);
    let mut bytes = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut bytes);
    if let Err(e) = cropped.write_to(&mut cursor, image::ImageFormat::Png) {
        warn!(error = %e, "Cannot encode cropped image");
        return None;
    }

    Some((RawImage::new(bytes, "image/png"), rect))
}

// ============================================================================
// Region detector client (secondary tier)
// ============================================================================

#[derive(Debug, Deserialize)]
struct RegionDetectResponse {
    #[serde(default)]
    predictions: Vec<RegionPrediction>,
}

/// One detected region: normalized `[x, y, w, h]` plus confidence.
#[derive(Debug, Deserialize)]
struct RegionPrediction {
    #[allow(dead_code)]
    #[serde(default)]
    label: Option<String>,
    confidence: f64,
    bbox: [f64; 4],
}

/// Client for the standalone region-detector service.
pub struct RegionDetectorClient {
    client: reqwest::Client,
    endpoint: String,
    timeout_ms: u64,
}

impl RegionDetectorClient {
    /// `None` when no endpoint is configured (the tier is skipped).
    pub fn from_config(config: &DetectorConfig) -> Option<Self> {
        let endpoint = config.endpoint.clone()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        match client {
            Ok(client) => Some(Self {
                client,
                endpoint,
                timeout_ms: config.timeout_secs * 1000,
            }),
            Err(e) => {
                warn!(error = %e, "Region detector client build failed; tier disabled");
                None
            }
        }
    }
}

#[async_trait]
impl SubjectLocator for RegionDetectorClient {
    fn source(&self) -> CropSource {
        CropSource::RegionDetector
    }

    /// Highest-confidence region, if the detector finds any.
    async fn locate(&self, image: &RawImage) -> Result<Option<NormalizedBox>, ExpertError> {
        let body = serde_json::json!({ "image_data": image.to_base64() });

        let response = self
            .client
            .post(&self.endpoint)
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
            return Err(ExpertError::Api {
                status: status.as_u16(),
                message: format!("region detector returned {}", status),
            });
        }

        let parsed: RegionDetectResponse = response
            .json()
            .await
            .map_err(|e| ExpertError::Parse(format!("region detector response: {}", e)))?;

        let best = parsed
            .predictions
            .into_iter()
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|p| NormalizedBox {
                x: p.bbox[0],
                y: p.bbox[1],
                w: p.bbox[2],
                h: p.bbox[3],
            });

        Ok(best)
    }
}
