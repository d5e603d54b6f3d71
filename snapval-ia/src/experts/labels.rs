//! Content-labels expert

use crate::types::{
    ExpertAdapter, ExpertError, ExpertFinding, ExpertKind, LabelAnnotation, RawImage,
};
use crate::vision::{AnnotateResponse, VisionClientCache, VisionFeature};
use async_trait::async_trait;
use std::sync::Arc;

pub struct LabelsExpert {
    cache: Arc<VisionClientCache>,
}

impl LabelsExpert {
    pub fn new(cache: Arc<VisionClientCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ExpertAdapter for LabelsExpert {
    fn kind(&self) -> ExpertKind {
        ExpertKind::Labels
    }

    async fn observe(&self, image: &RawImage) -> Result<ExpertFinding, ExpertError> {
        let client = self.cache.get().await?;
        let response = client.annotate(image, VisionFeature::LabelDetection).await?;
        Ok(map_response(response))
    }
}

fn map_response(response: AnnotateResponse) -> ExpertFinding {
    let labels = response
        .label_annotations
        .unwrap_or_default()
        .into_iter()
        .map(|l| LabelAnnotation {
            description: l.description,
            score: l.score.unwrap_or(0.0),
        })
        .collect();
    ExpertFinding::Labels(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_preserve_service_order() {
        let json = r#"{
            "labelAnnotations": [
                {"description": "Polo shirt", "score": 0.94},
                {"description": "Cotton", "score": 0.81},
                {"description": "Sleeve"}
            ]
        }"#;
        let response: AnnotateResponse = serde_json::from_str(json).expect("parse");

        let ExpertFinding::Labels(labels) = map_response(response) else {
            panic!("wrong finding variant");
        };

        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0].description, "Polo shirt");
        assert_eq!(labels[2].score, 0.0); // missing score defaults
    }
}
