//! Web-entities expert
//!
//! Matches the photo against web image indexes; the best-guess label is
//! typically the strongest single identification signal available.

use crate::types::{ExpertAdapter, ExpertError, ExpertFinding, ExpertKind, RawImage, WebEntity};
use crate::vision::{AnnotateResponse, VisionClientCache, VisionFeature};
use async_trait::async_trait;
use std::sync::Arc;

pub struct WebEntitiesExpert {
    cache: Arc<VisionClientCache>,
}

impl WebEntitiesExpert {
    pub fn new(cache: Arc<VisionClientCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ExpertAdapter for WebEntitiesExpert {
    fn kind(&self) -> ExpertKind {
        ExpertKind::WebEntities
    }

    async fn observe(&self, image: &RawImage) -> Result<ExpertFinding, ExpertError> {
        let client = self.cache.get().await?;
        let response = client.annotate(image, VisionFeature::WebDetection).await?;
        Ok(map_response(response))
    }
}

/// Flatten best-guess labels and web entities into one ranked list.
///
/// Best guesses carry no score on the wire but outrank raw entities, so
/// they lead the list at score 1.0. Duplicate descriptions (case
/// insensitive) keep their first occurrence.
fn map_response(response: AnnotateResponse) -> ExpertFinding {
    let mut entities: Vec<WebEntity> = Vec::new();

    if let Some(detection) = response.web_detection {
        for guess in detection.best_guess_labels.unwrap_or_default() {
            entities.push(WebEntity {
                description: guess.label,
                score: 1.0,
            });
        }
        for entity in detection.web_entities.unwrap_or_default() {
            if let Some(description) = entity.description {
                entities.push(WebEntity {
                    description,
                    score: entity.score.unwrap_or(0.0),
                });
            }
        }
    }

    let mut seen = std::collections::BTreeSet::new();
    entities.retain(|e| seen.insert(e.description.to_lowercase()));

    ExpertFinding::WebEntities(entities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_guess_leads_and_duplicates_drop() {
        let json = r#"{
            "webDetection": {
                "webEntities": [
                    {"description": "Polo shirt", "score": 0.77},
                    {"description": "Ralph Lauren polo shirt", "score": 0.54},
                    {"score": 0.3}
                ],
                "bestGuessLabels": [{"label": "polo shirt"}]
            }
        }"#;
        let response: AnnotateResponse = serde_json::from_str(json).expect("parse");

        let ExpertFinding::WebEntities(entities) = map_response(response) else {
            panic!("wrong finding variant");
        };

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].description, "polo shirt");
        assert_eq!(entities[0].score, 1.0);
        assert_eq!(entities[1].description, "Ralph Lauren polo shirt");
    }

    #[test]
    fn test_missing_section_is_empty_success() {
        let response = AnnotateResponse::default();
        let ExpertFinding::WebEntities(entities) = map_response(response) else {
            panic!("wrong finding variant");
        };
        assert!(entities.is_empty());
    }
}
