//! OCR text expert
//!
//! Recognized text is the highest-weight signal for brand identification
//! downstream; care tags and printed logos usually land here.

use crate::types::{ExpertAdapter, ExpertError, ExpertFinding, ExpertKind, RawImage, TextBlock};
use crate::vision::{AnnotateResponse, VisionClientCache, VisionFeature};
use async_trait::async_trait;
use std::sync::Arc;

pub struct TextExpert {
    cache: Arc<VisionClientCache>,
}

impl TextExpert {
    pub fn new(cache: Arc<VisionClientCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ExpertAdapter for TextExpert {
    fn kind(&self) -> ExpertKind {
        ExpertKind::Text
    }

    async fn observe(&self, image: &RawImage) -> Result<ExpertFinding, ExpertError> {
        let client = self.cache.get().await?;
        let response = client.annotate(image, VisionFeature::TextDetection).await?;
        Ok(map_response(response))
    }
}

/// Prefer the assembled full-text annotation; fall back to the first raw
/// text annotation (which also carries the document text for this
/// feature). No text at all is an empty success.
fn map_response(response: AnnotateResponse) -> ExpertFinding {
    let locale = response
        .text_annotations
        .as_ref()
        .and_then(|t| t.first())
        .and_then(|t| t.locale.clone());

    let full_text = match response.full_text_annotation {
        Some(full) => full.text,
        None => response
            .text_annotations
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|t| t.description)
            .unwrap_or_default(),
    };

    ExpertFinding::Text(TextBlock {
        full_text: full_text.trim().to_string(),
        locale,
    })
}
