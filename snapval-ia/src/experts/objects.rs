//! Localized-objects expert
//!
//! Bounding boxes stay in normalized coordinates here; only the cropper
//! converts to pixels (it is the one place the image gets decoded).

use crate::types::{
    DetectedObject, ExpertAdapter, ExpertError, ExpertFinding, ExpertKind, RawImage,
};
use crate::vision::{AnnotateResponse, VisionClientCache, VisionFeature};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ObjectsExpert {
    cache: Arc<VisionClientCache>,
}

impl ObjectsExpert {
    pub fn new(cache: Arc<VisionClientCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ExpertAdapter for ObjectsExpert {
    fn kind(&self) -> ExpertKind {
        ExpertKind::Objects
    }

    async fn observe(&self, image: &RawImage) -> Result<ExpertFinding, ExpertError> {
        let client = self.cache.get().await?;
        let response = client
            .annotate(image, VisionFeature::ObjectLocalization)
            .await?;
        Ok(map_response(response))
    }
}

fn map_response(response: AnnotateResponse) -> ExpertFinding {
    let objects = response
        .localized_object_annotations
        .unwrap_or_default()
        .into_iter()
        .map(|o| DetectedObject {
            name: o.name,
            score: o.score.unwrap_or(0.0),
            bounding_box: o.bounding_poly.as_ref().and_then(|p| p.to_normalized_box()),
        })
        .collect();
    ExpertFinding::Objects(objects)
}
