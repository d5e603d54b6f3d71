//! Analysis pipeline orchestrator
//!
//! Owns the end-to-end sequencing: crop, concurrent expert dispatch,
//! synthesis, query building, marketplace search, visual re-ranking and
//! price analysis. Every stage after input validation degrades instead
//! of failing: a malformed image is the only thing that aborts without
//! a result.
//!
//! The stage machine runs Received through Complete in order. Failed is
//! terminal and reachable only from Received.

use crate::config::IaConfig;
use crate::crop::Cropper;
use crate::experts::ExpertRegistry;
use crate::market::MarketplaceGateway;
use crate::pricing;
use crate::query;
use crate::rerank::{HttpImageFetcher, VisualEmbedder, VisualReranker};
use crate::synthesis::Synthesizer;
use crate::types::{
    AnalysisStage, CandidateListing, CropResult, CropSource, PriceAnalysis, QueryVariant,
    RankedComp, RawImage, Rect, SynthesisStrategy, SynthesizedAttributes,
};
use crate::vision::VisionClientCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use snapval_common::events::{AnalysisEvent, EventBus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hex characters of the SHA-256 kept as the image fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// The only fatal analysis error. Everything else degrades into the
/// summary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("invalid input image: {0}")]
    InvalidInput(String),
}

/// Per-request knobs for [`Analyzer::run_complete_analysis`].
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Localize the principal subject before dispatching experts.
    pub intelligent_crop: bool,
    /// Marketplace category filter, passed through to the gateway.
    pub category_filter: Option<String>,
    /// Listing-count override; the configured default applies when unset.
    pub limit: Option<usize>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            intelligent_crop: true,
            category_filter: None,
            limit: None,
        }
    }
}

/// Complete pipeline output for one photograph.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub identified_attributes: SynthesizedAttributes,
    /// Query text that produced the comps, or the highest-priority
    /// variant when no search succeeded, or empty when the attributes
    /// carried nothing searchable.
    pub market_query_used: String,
    pub visually_ranked_comps: Vec<RankedComp>,
    pub search_success: bool,
    pub price_analysis: PriceAnalysis,
    pub analysis_summary: AnalysisSummary,
}

/// Per-stage observability attached to every result. Degradations land
/// here instead of failing the request.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub analysis_id: Uuid,
    pub image_fingerprint: String,
    pub stage: AnalysisStage,
    pub crop_source: CropSource,
    pub crop_bounding_box: Option<Rect>,
    pub experts_dispatched: usize,
    pub experts_succeeded: usize,
    /// Adapter identity to error text, for experts that failed.
    pub expert_errors: BTreeMap<String, String>,
    pub synthesis_strategy: SynthesisStrategy,
    /// Why the generative strategy was skipped, when it was.
    pub synthesis_degraded_reason: Option<String>,
    pub query_variants: Vec<QueryVariant>,
    pub search_error: Option<String>,
    pub stage_timings_ms: BTreeMap<String, u64>,
    pub total_elapsed_ms: u64,
}

/// Standalone crop preview, exposed without running the full pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct CropPreview {
    /// Base64 of the cropped image bytes.
    pub cropped_image: String,
    /// Which localization service produced the crop ("none" for
    /// pass-through).
    pub service: String,
    pub bounding_box: Option<Rect>,
}

/// Dependency-injected service registry for the pipeline.
///
/// Every entry is constructed once at process start and shared by
/// reference across concurrent analyses; nothing here mutates per
/// request.
pub struct Analyzer {
    registry: Arc<ExpertRegistry>,
    cropper: Arc<Cropper>,
    synthesizer: Arc<Synthesizer>,
    reranker: Arc<VisualReranker>,
    event_bus: Arc<EventBus>,
    search_limit: usize,
}

impl Analyzer {
    /// Wire the production service registry from configuration.
    pub fn from_config(config: &IaConfig, event_bus: Arc<EventBus>) -> Self {
        let vision = Arc::new(VisionClientCache::new(config.vision.clone()));
        let registry = Arc::new(ExpertRegistry::with_vision_cache(
            Arc::clone(&vision),
            &config.experts,
        ));
        let cropper = Arc::new(Cropper::new(vision, &config.detector));
        let synthesizer = Arc::new(Synthesizer::new(
            &config.generative,
            config.lexicons.clone(),
        ));
        let embedder = Arc::new(VisualEmbedder::new());
        let fetcher = Arc::new(HttpImageFetcher::new(config.reranker.fetch_timeout_secs));
        let reranker = Arc::new(VisualReranker::new(embedder, fetcher, &config.reranker));

        Self {
            registry,
            cropper,
            synthesizer,
            reranker,
            event_bus,
            search_limit: config.marketplace.default_limit,
        }
    }

    /// Assemble from already-built services. Test seam.
    pub fn new(
        registry: Arc<ExpertRegistry>,
        cropper: Arc<Cropper>,
        synthesizer: Arc<Synthesizer>,
        reranker: Arc<VisualReranker>,
        event_bus: Arc<EventBus>,
        search_limit: usize,
    ) -> Self {
        Self {
            registry,
            cropper,
            synthesizer,
            reranker,
            event_bus,
            search_limit,
        }
    }

    /// Run the full identify-and-price pipeline over one photograph.
    ///
    /// The marketplace search capability is caller-supplied; the
    /// analyzer itself holds no marketplace state. Returns an error
    /// only for invalid input; expert failures, search unavailability
    /// and empty comp sets all produce a degraded-but-complete result.
    pub async fn run_complete_analysis(
        &self,
        image_bytes: Vec<u8>,
        gateway: &dyn MarketplaceGateway,
        options: AnalysisOptions,
    ) -> Result<AnalysisResult, AnalysisError> {
        let analysis_id = Uuid::new_v4();
        let started = Instant::now();
        let mut stage = AnalysisStage::Received;
        let mut timings: BTreeMap<String, u64> = BTreeMap::new();

        let image = match validate_image(image_bytes) {
            Ok(image) => image,
            Err(e) => {
                stage = AnalysisStage::Failed;
                warn!(analysis_id = %analysis_id, stage = %stage, error = %e, "Analysis rejected");
                self.event_bus.emit_lossy(AnalysisEvent::AnalysisFailed {
                    analysis_id,
                    reason: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                return Err(e);
            }
        };

        let fingerprint = fingerprint(image.bytes());
        info!(
            analysis_id = %analysis_id,
            fingerprint = %fingerprint,
            bytes = image.len(),
            "Analysis started"
        );
        self.event_bus.emit_lossy(AnalysisEvent::AnalysisStarted {
            analysis_id,
            image_fingerprint: fingerprint.clone(),
            timestamp: chrono::Utc::now(),
        });

        // Crop
        let stage_start = Instant::now();
        let crop = if options.intelligent_crop {
            self.cropper.crop(&image).await
        } else {
            CropResult::passthrough(image.clone())
        };
        let crop_ms = stage_start.elapsed().as_millis() as u64;
        timings.insert("crop".to_string(), crop_ms);
        stage = AnalysisStage::Cropped;
        debug!(analysis_id = %analysis_id, stage = %stage, source = %crop.source_detector, "Stage complete");
        self.event_bus.emit_lossy(AnalysisEvent::CropCompleted {
            analysis_id,
            source: crop.source_detector.as_str().to_string(),
            elapsed_ms: crop_ms,
            timestamp: chrono::Utc::now(),
        });

        // Experts (concurrent, individually time-bounded)
        let stage_start = Instant::now();
        let evidence = self
            .registry
            .dispatch_all(&crop.cropped_image, &self.event_bus, analysis_id)
            .await;
        timings.insert(
            "experts".to_string(),
            stage_start.elapsed().as_millis() as u64,
        );
        stage = AnalysisStage::ExpertsDispatched;
        debug!(
            analysis_id = %analysis_id,
            stage = %stage,
            succeeded = evidence.success_count(),
            dispatched = evidence.dispatched.len(),
            "Stage complete"
        );

        // Synthesis
        let stage_start = Instant::now();
        let synthesis = self
            .synthesizer
            .synthesize(&crop.cropped_image, &evidence)
            .await;
        timings.insert(
            "synthesis".to_string(),
            stage_start.elapsed().as_millis() as u64,
        );
        stage = AnalysisStage::Synthesized;
        debug!(
            analysis_id = %analysis_id,
            stage = %stage,
            strategy = %synthesis.strategy,
            confidence = synthesis.attributes.confidence_score,
            "Stage complete"
        );
        self.event_bus.emit_lossy(AnalysisEvent::SynthesisCompleted {
            analysis_id,
            strategy: synthesis.strategy.as_str().to_string(),
            confidence: synthesis.attributes.confidence_score,
            timestamp: chrono::Utc::now(),
        });

        // Query variants
        let variants = query::build_variants(&synthesis.attributes);
        stage = AnalysisStage::QueryBuilt;
        debug!(analysis_id = %analysis_id, stage = %stage, variants = variants.len(), "Stage complete");

        // Marketplace search
        let stage_start = Instant::now();
        let search = self.search_variants(&variants, gateway, &options).await;
        timings.insert(
            "search".to_string(),
            stage_start.elapsed().as_millis() as u64,
        );
        stage = AnalysisStage::Searched;
        debug!(
            analysis_id = %analysis_id,
            stage = %stage,
            query = %search.query_used,
            listings = search.listings.len(),
            success = search.success,
            "Stage complete"
        );
        self.event_bus.emit_lossy(AnalysisEvent::SearchCompleted {
            analysis_id,
            query: search.query_used.clone(),
            listing_count: search.listings.len(),
            success: search.success,
            timestamp: chrono::Utc::now(),
        });

        // Visual re-rank
        let stage_start = Instant::now();
        let comps = self
            .reranker
            .rerank(&crop.cropped_image, search.listings)
            .await;
        timings.insert(
            "rerank".to_string(),
            stage_start.elapsed().as_millis() as u64,
        );
        stage = AnalysisStage::Reranked;
        debug!(analysis_id = %analysis_id, stage = %stage, comps = comps.len(), "Stage complete");
        self.event_bus.emit_lossy(AnalysisEvent::RerankCompleted {
            analysis_id,
            comp_count: comps.len(),
            timestamp: chrono::Utc::now(),
        });

        // Price
        let price_analysis = pricing::analyze(&comps);
        stage = AnalysisStage::Priced;
        debug!(
            analysis_id = %analysis_id,
            stage = %stage,
            suggested = price_analysis.suggested_price,
            sample = price_analysis.sample_size,
            "Stage complete"
        );

        stage = AnalysisStage::Complete;
        let total_elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            analysis_id = %analysis_id,
            stage = %stage,
            elapsed_ms = total_elapsed_ms,
            suggested = price_analysis.suggested_price,
            confidence = %price_analysis.confidence_label,
            "Analysis complete"
        );
        self.event_bus.emit_lossy(AnalysisEvent::AnalysisCompleted {
            analysis_id,
            suggested_price: price_analysis.suggested_price,
            confidence_label: price_analysis.confidence_label.as_str().to_string(),
            elapsed_ms: total_elapsed_ms,
            timestamp: chrono::Utc::now(),
        });

        let expert_errors = evidence
            .failures
            .iter()
            .map(|(kind, error)| (kind.as_str().to_string(), error.to_string()))
            .collect();

        Ok(AnalysisResult {
            identified_attributes: synthesis.attributes,
            market_query_used: search.query_used,
            visually_ranked_comps: comps,
            search_success: search.success,
            price_analysis,
            analysis_summary: AnalysisSummary {
                analysis_id,
                image_fingerprint: fingerprint,
                stage,
                crop_source: crop.source_detector,
                crop_bounding_box: crop.bounding_box,
                experts_dispatched: evidence.dispatched.len(),
                experts_succeeded: evidence.success_count(),
                expert_errors,
                synthesis_strategy: synthesis.strategy,
                synthesis_degraded_reason: synthesis.degraded_reason,
                query_variants: variants,
                search_error: search.error,
                stage_timings_ms: timings,
                total_elapsed_ms,
            },
        })
    }

    /// Standalone crop preview. Validates input, runs the cropper, and
    /// returns the (possibly pass-through) crop without touching experts
    /// or the marketplace.
    pub async fn intelligent_crop(
        &self,
        image_bytes: Vec<u8>,
    ) -> Result<CropPreview, AnalysisError> {
        let image = validate_image(image_bytes)?;
        let crop = self.cropper.crop(&image).await;
        Ok(CropPreview {
            cropped_image: crop.cropped_image.to_base64(),
            service: crop.source_detector.as_str().to_string(),
            bounding_box: crop.bounding_box,
        })
    }

    /// Try variants in priority order until one yields listings.
    ///
    /// An empty successful result keeps trying lower-priority variants;
    /// unavailability is recorded and never propagated.
    async fn search_variants(
        &self,
        variants: &[QueryVariant],
        gateway: &dyn MarketplaceGateway,
        options: &AnalysisOptions,
    ) -> SearchOutcome {
        let limit = options.limit.unwrap_or(self.search_limit);
        let mut outcome = SearchOutcome {
            query_used: String::new(),
            listings: Vec::new(),
            success: false,
            error: None,
        };

        for variant in variants {
            match gateway
                .search(&variant.query_text, options.category_filter.as_deref(), limit)
                .await
            {
                Ok(listings) if !listings.is_empty() => {
                    outcome.query_used = variant.query_text.clone();
                    outcome.listings = listings;
                    outcome.success = true;
                    return outcome;
                }
                Ok(_) => {
                    debug!(query = %variant.query_text, "Marketplace returned no listings");
                    if !outcome.success {
                        outcome.query_used = variant.query_text.clone();
                        outcome.success = true;
                    }
                }
                Err(e) => {
                    warn!(query = %variant.query_text, error = %e, "Marketplace search unavailable");
                    if outcome.error.is_none() {
                        outcome.error = Some(e.reason.clone());
                    }
                }
            }
        }

        // Nothing searchable or nothing reachable: report the variant we
        // would have wanted answered.
        if outcome.query_used.is_empty() {
            outcome.query_used = variants
                .first()
                .map(|v| v.query_text.clone())
                .unwrap_or_default();
        }
        outcome
    }
}

struct SearchOutcome {
    query_used: String,
    listings: Vec<CandidateListing>,
    success: bool,
    error: Option<String>,
}

/// Validate input bytes as a supported image and tag the content type.
fn validate_image(bytes: Vec<u8>) -> Result<RawImage, AnalysisError> {
    if bytes.is_empty() {
        return Err(AnalysisError::InvalidInput("empty image payload".to_string()));
    }
    let kind = infer::get(&bytes)
        .ok_or_else(|| AnalysisError::InvalidInput("unrecognized file format".to_string()))?;
    let mime = kind.mime_type();
    if !mime.starts_with("image/") {
        return Err(AnalysisError::InvalidInput(format!(
            "unsupported content type {mime}"
        )));
    }
    Ok(RawImage::new(bytes, mime))
}

/// Short SHA-256 prefix identifying the input bytes in logs and events.
fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..FINGERPRINT_LEN].to_string()
}
