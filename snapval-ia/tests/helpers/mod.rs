//! Test helpers for snapval-ia integration tests
//!
//! Provides stub expert adapters, a scripted marketplace gateway, and an
//! in-memory listing image fetcher so full analyses run without any
//! network access.

#![allow(dead_code)]

use async_trait::async_trait;
use snapval_ia::config::{DetectorConfig, Lexicons, RerankConfig, VisionConfig};
use snapval_ia::crop::Cropper;
use snapval_ia::experts::ExpertRegistry;
use snapval_ia::market::{MarketplaceGateway, SearchUnavailable};
use snapval_ia::pipeline::Analyzer;
use snapval_ia::rerank::{FetchError, ListingImageFetcher, VisualEmbedder, VisualReranker};
use snapval_ia::synthesis::Synthesizer;
use snapval_ia::types::{
    CandidateListing, ExpertAdapter, ExpertError, ExpertFinding, ExpertKind, RawImage,
};
use snapval_ia::vision::VisionClientCache;
use snapval_common::events::EventBus;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Solid-color PNG fixture.
pub fn png_bytes(rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(48, 48, image::Rgb(rgb));
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .unwrap();
    cursor.into_inner()
}

/// Expert adapter that always returns the configured finding.
pub struct FixedExpert {
    kind: ExpertKind,
    finding: ExpertFinding,
}

impl FixedExpert {
    pub fn new(finding: ExpertFinding) -> Self {
        Self {
            kind: finding.kind(),
            finding,
        }
    }
}

#[async_trait]
impl ExpertAdapter for FixedExpert {
    fn kind(&self) -> ExpertKind {
        self.kind
    }

    async fn observe(&self, _image: &RawImage) -> Result<ExpertFinding, ExpertError> {
        Ok(self.finding.clone())
    }
}

/// Expert adapter that always fails with a network error.
pub struct BrokenExpert(pub ExpertKind);

#[async_trait]
impl ExpertAdapter for BrokenExpert {
    fn kind(&self) -> ExpertKind {
        self.0
    }

    async fn observe(&self, _image: &RawImage) -> Result<ExpertFinding, ExpertError> {
        Err(ExpertError::Network("connection refused".to_string()))
    }
}

/// Gateway returning a fixed listing set for every query.
pub struct FixedGateway(pub Vec<CandidateListing>);

#[async_trait]
impl MarketplaceGateway for FixedGateway {
    async fn search(
        &self,
        _query_text: &str,
        _category_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateListing>, SearchUnavailable> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }
}

/// Gateway that is always unreachable.
pub struct DownGateway;

#[async_trait]
impl MarketplaceGateway for DownGateway {
    async fn search(
        &self,
        _query_text: &str,
        _category_filter: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<CandidateListing>, SearchUnavailable> {
        Err(SearchUnavailable::new("marketplace unreachable"))
    }
}

/// In-memory image store standing in for listing image URLs.
pub struct MapFetcher(pub HashMap<String, Vec<u8>>);

#[async_trait]
impl ListingImageFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.0.get(url).cloned().ok_or(FetchError::Status(404))
    }
}

/// Candidate listing fixture.
pub fn listing(id: &str, price: Option<f64>, image_url: &str) -> CandidateListing {
    CandidateListing {
        id: id.to_string(),
        title: format!("listing {id}"),
        price,
        image_url: image_url.to_string(),
        canonical_url: format!("https://market.example/item/{id}"),
    }
}

/// Analyzer wired from stub adapters, with no vision key, no region
/// detector, no generative endpoint, and an in-memory image fetcher.
pub fn build_analyzer(
    adapters: Vec<Arc<dyn ExpertAdapter>>,
    images: HashMap<String, Vec<u8>>,
    event_bus: Arc<EventBus>,
) -> Analyzer {
    let vision = Arc::new(VisionClientCache::new(VisionConfig::default()));
    let registry = Arc::new(ExpertRegistry::from_adapters(
        adapters,
        Duration::from_millis(500),
    ));
    let cropper = Arc::new(Cropper::new(vision, &DetectorConfig::default()));
    let synthesizer = Arc::new(Synthesizer::heuristic_only(Lexicons::default()));
    let reranker = Arc::new(VisualReranker::new(
        Arc::new(VisualEmbedder::new()),
        Arc::new(MapFetcher(images)),
        &RerankConfig::default(),
    ));
    Analyzer::new(registry, cropper, synthesizer, reranker, event_bus, 12)
}

/// The usual stubbed evidence set: labels plus OCR brand text.
pub fn clothing_adapters() -> Vec<Arc<dyn ExpertAdapter>> {
    use snapval_ia::types::{LabelAnnotation, TextBlock};
    vec![
        Arc::new(FixedExpert::new(ExpertFinding::Labels(vec![
            LabelAnnotation {
                description: "polo shirt".to_string(),
                score: 0.95,
            },
            LabelAnnotation {
                description: "cotton".to_string(),
                score: 0.82,
            },
        ]))),
        Arc::new(FixedExpert::new(ExpertFinding::Text(TextBlock {
            full_text: "RALPH LAUREN".to_string(),
            locale: Some("en".to_string()),
        }))),
    ]
}
