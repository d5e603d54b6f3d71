//! Dominant-colors expert
//!
//! The service reports raw RGB clusters; listings and queries need color
//! words, so each cluster is named by nearest match against a small fixed
//! palette.

use crate::types::{
    DominantColor, ExpertAdapter, ExpertError, ExpertFinding, ExpertKind, RawImage,
};
use crate::vision::{AnnotateResponse, VisionClientCache, VisionFeature};
use async_trait::async_trait;
use std::sync::Arc;

/// Named reference colors. Resale queries only ever use coarse words, so
/// the palette stays deliberately small.
const PALETTE: &[(&str, u8, u8, u8)] = &[
    ("black", 20, 20, 20),
    ("white", 245, 245, 245),
    ("gray", 128, 128, 128),
    ("silver", 192, 192, 192),
    ("red", 200, 30, 40),
    ("maroon", 128, 0, 32),
    ("orange", 255, 140, 0),
    ("brown", 139, 69, 19),
    ("tan", 210, 180, 140),
    ("beige", 232, 220, 202),
    ("yellow", 250, 210, 40),
    ("olive", 120, 120, 40),
    ("green", 40, 140, 60),
    ("teal", 0, 128, 128),
    ("turquoise", 64, 224, 208),
    ("blue", 50, 100, 200),
    ("navy", 20, 30, 90),
    ("purple", 128, 40, 160),
    ("pink", 250, 130, 180),
];

pub struct ColorsExpert {
    cache: Arc<VisionClientCache>,
}

impl ColorsExpert {
    pub fn new(cache: Arc<VisionClientCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ExpertAdapter for ColorsExpert {
    fn kind(&self) -> ExpertKind {
        ExpertKind::Colors
    }

    async fn observe(&self, image: &RawImage) -> Result<ExpertFinding, ExpertError> {
        let client = self.cache.get().await?;
        let response = client
            .annotate(image, VisionFeature::ImageProperties)
            .await?;
        Ok(map_response(response))
    }
}

fn map_response(response: AnnotateResponse) -> ExpertFinding {
    let colors = response
        .image_properties_annotation
        .and_then(|p| p.dominant_colors)
        .map(|d| d.colors)
        .unwrap_or_default()
        .into_iter()
        .map(|info| {
            let r = info.color.red.unwrap_or(0.0).clamp(0.0, 255.0) as u8;
            let g = info.color.green.unwrap_or(0.0).clamp(0.0, 255.0) as u8;
            let b = info.color.blue.unwrap_or(0.0).clamp(0.0, 255.0) as u8;
            DominantColor {
                name: name_color(r, g, b).to_string(),
                rgb: (r, g, b),
                score: info.score.unwrap_or(0.0),
                pixel_fraction: info.pixel_fraction.unwrap_or(0.0),
            }
        })
        .collect();
    ExpertFinding::Colors(colors)
}

/// Nearest palette entry by squared RGB distance.
pub fn name_color(r: u8, g: u8, b: u8) -> &'static str {
    let mut best = PALETTE[0].0;
    let mut best_distance = i64::MAX;
    for (name, pr, pg, pb) in PALETTE {
        let dr = r as i64 - *pr as i64;
        let dg = g as i64 - *pg as i64;
        let db = b as i64 - *pb as i64;
        let distance = dr * dr + dg * dg + db * db;
        if distance < best_distance {
            best_distance = distance;
            best = name;
        }
    }
    best
}

/// All palette color words, for callers that scan free text for colors.
pub fn palette_names() -> impl Iterator<Item = &'static str> {
    PALETTE.iter().map(|(name, _, _, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_color_basics() {
        assert_eq!(name_color(0, 0, 0), "black");
        assert_eq!(name_color(255, 255, 255), "white");
        assert_eq!(name_color(210, 25, 35), "red");
        assert_eq!(name_color(15, 25, 100), "navy");
        assert_eq!(name_color(45, 150, 55), "green");
    }

    #[test]
    fn test_dominant_colors_named_and_ordered() {
        let json = r#"{
            "imagePropertiesAnnotation": {
                "dominantColors": {
                    "colors": [
                        {"color": {"red": 18, "green": 28, "blue": 95}, "score": 0.42, "pixelFraction": 0.31},
                        {"color": {"red": 246, "green": 244, "blue": 240}, "score": 0.20, "pixelFraction": 0.12}
                    ]
                }
            }
        }"#;
        let response: AnnotateResponse = serde_json::from_str(json).expect("parse");

        let ExpertFinding::Colors(colors) = map_response(response) else {
            panic!("wrong finding variant");
        };

        assert_eq!(colors.len(), 2);
        assert_eq!(colors[0].name, "navy");
        assert_eq!(colors[1].name, "white");
        assert!(colors[0].score > colors[1].score);
    }

    #[test]
    fn test_missing_section_is_empty_success() {
        let ExpertFinding::Colors(colors) = map_response(AnnotateResponse::default()) else {
            panic!("wrong finding variant");
        };
        assert!(colors.is_empty());
    }
}
