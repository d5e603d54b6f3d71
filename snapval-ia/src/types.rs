//! Core types and traits for the item analysis pipeline
//!
//! Defines the domain model shared by every stage: the input image, crop
//! results, typed expert findings and their identity-keyed evidence set,
//! synthesized attributes, query variants, candidate listings, ranked
//! comps, price analysis, and the pipeline stage enum.
//!
//! Expert outputs are typed optional-field records. Absence of a signal is
//! a first-class state (`None` / missing map entry), never a stringly-typed
//! lookup miss.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Confidence assigned when no expert produced any signal.
///
/// Synthesis must still return a well-formed result in that case; this is
/// the floor it reports instead of erroring.
pub const MINIMAL_CONFIDENCE: f64 = 0.1;

// ============================================================================
// Input image
// ============================================================================

/// Immutable input image: raw bytes plus declared content type.
///
/// Never persisted by the pipeline; lives for one analysis request.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    bytes: Vec<u8>,
    content_type: String,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Standard base64 encoding of the image bytes, as embedded in
    /// JSON payloads to the vision and generative services.
    pub fn to_base64(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// Pixel-space rectangle (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Rectangle in normalized [0,1] image coordinates, as reported by the
/// localization services. Converted to pixels only when cropping, where
/// the image dimensions are known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl NormalizedBox {
    /// Convert to a pixel rect clamped to the image bounds.
    /// Returns `None` for degenerate (zero-area) boxes.
    pub fn to_pixel_rect(&self, image_w: u32, image_h: u32) -> Option<Rect> {
        if image_w == 0 || image_h == 0 {
            return None;
        }
        let x = (self.x.clamp(0.0, 1.0) * image_w as f64).floor() as u32;
        let y = (self.y.clamp(0.0, 1.0) * image_h as f64).floor() as u32;
        let w = (self.w.clamp(0.0, 1.0) * image_w as f64).round() as u32;
        let h = (self.h.clamp(0.0, 1.0) * image_h as f64).round() as u32;

        let x = x.min(image_w.saturating_sub(1));
        let y = y.min(image_h.saturating_sub(1));
        let w = w.min(image_w - x);
        let h = h.min(image_h - y);

        if w == 0 || h == 0 {
            return None;
        }
        Some(Rect { x, y, w, h })
    }
}

// ============================================================================
// Cropping
// ============================================================================

/// Which localization service produced the crop bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropSource {
    /// No subject located; the original image passed through unchanged.
    None,
    /// Primary: the vision service's object localizer.
    ObjectLocalizer,
    /// Secondary: the standalone region-detector service.
    RegionDetector,
}

impl CropSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CropSource::None => "none",
            CropSource::ObjectLocalizer => "object_localizer",
            CropSource::RegionDetector => "region_detector",
        }
    }
}

impl std::fmt::Display for CropSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of the crop stage.
///
/// Invariant: `source_detector == CropSource::None` implies
/// `cropped_image` is byte-identical to the input and `bounding_box` is
/// `None`.
#[derive(Debug, Clone)]
pub struct CropResult {
    pub cropped_image: RawImage,
    pub source_detector: CropSource,
    pub bounding_box: Option<Rect>,
}

impl CropResult {
    /// Pass-through result carrying the original image.
    pub fn passthrough(image: RawImage) -> Self {
        Self {
            cropped_image: image,
            source_detector: CropSource::None,
            bounding_box: None,
        }
    }
}

// ============================================================================
// Expert findings
// ============================================================================

/// Identity of one expert adapter.
///
/// `Ord` so evidence maps iterate in a stable order regardless of which
/// expert settled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertKind {
    WebEntities,
    Labels,
    Objects,
    Text,
    Colors,
}

impl ExpertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpertKind::WebEntities => "web_entities",
            ExpertKind::Labels => "labels",
            ExpertKind::Objects => "objects",
            ExpertKind::Text => "text",
            ExpertKind::Colors => "colors",
        }
    }

    /// All adapter identities in canonical order.
    pub fn all() -> [ExpertKind; 5] {
        [
            ExpertKind::WebEntities,
            ExpertKind::Labels,
            ExpertKind::Objects,
            ExpertKind::Text,
            ExpertKind::Colors,
        ]
    }
}

impl std::fmt::Display for ExpertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Web entity match (description plus relevance score).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebEntity {
    pub description: String,
    pub score: f64,
}

/// Content label with detection score in [0,1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelAnnotation {
    pub description: String,
    pub score: f64,
}

/// Localized object detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub name: String,
    pub score: f64,
    pub bounding_box: Option<NormalizedBox>,
}

/// OCR output: the full recognized text block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub full_text: String,
    pub locale: Option<String>,
}

impl TextBlock {
    /// Words of the recognized text, lowercased, punctuation-trimmed.
    pub fn words(&self) -> Vec<String> {
        self.full_text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect()
    }
}

/// Dominant color with a human-readable name resolved from RGB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominantColor {
    pub name: String,
    pub rgb: (u8, u8, u8),
    pub score: f64,
    pub pixel_fraction: f64,
}

/// One expert's successful finding, tagged by capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpertFinding {
    WebEntities(Vec<WebEntity>),
    Labels(Vec<LabelAnnotation>),
    Objects(Vec<DetectedObject>),
    Text(TextBlock),
    Colors(Vec<DominantColor>),
}

impl ExpertFinding {
    pub fn kind(&self) -> ExpertKind {
        match self {
            ExpertFinding::WebEntities(_) => ExpertKind::WebEntities,
            ExpertFinding::Labels(_) => ExpertKind::Labels,
            ExpertFinding::Objects(_) => ExpertKind::Objects,
            ExpertFinding::Text(_) => ExpertKind::Text,
            ExpertFinding::Colors(_) => ExpertKind::Colors,
        }
    }
}

/// Typed failure from one expert adapter. Never fatal to the request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpertError {
    /// Client could not be constructed (e.g. missing credential); the
    /// adapter is unavailable for the rest of the process lifetime.
    #[error("Expert not available: {0}")]
    NotAvailable(String),

    /// Transport-level failure reaching the service.
    #[error("Network error: {0}")]
    Network(String),

    /// Service answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response arrived but could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Per-call budget exceeded.
    #[error("Timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64 },
}

/// Complete set of expert outcomes for one request.
///
/// One success-or-failure entry per dispatched adapter, keyed by adapter
/// identity. The shape is independent of completion order, so downstream
/// synthesis cannot be order-dependent.
#[derive(Debug, Clone, Default)]
pub struct ExpertEvidence {
    pub web_entities: Option<Vec<WebEntity>>,
    pub labels: Option<Vec<LabelAnnotation>>,
    pub objects: Option<Vec<DetectedObject>>,
    pub text: Option<TextBlock>,
    pub colors: Option<Vec<DominantColor>>,
    /// Typed failures for adapters that did not produce a finding.
    pub failures: BTreeMap<ExpertKind, ExpertError>,
    /// Adapters dispatched this request, in canonical order.
    pub dispatched: BTreeSet<ExpertKind>,
}

impl ExpertEvidence {
    /// Record one adapter outcome into its identity-keyed slot.
    pub fn record(&mut self, kind: ExpertKind, outcome: Result<ExpertFinding, ExpertError>) {
        self.dispatched.insert(kind);
        match outcome {
            Ok(ExpertFinding::WebEntities(v)) => self.web_entities = Some(v),
            Ok(ExpertFinding::Labels(v)) => self.labels = Some(v),
            Ok(ExpertFinding::Objects(v)) => self.objects = Some(v),
            Ok(ExpertFinding::Text(t)) => self.text = Some(t),
            Ok(ExpertFinding::Colors(v)) => self.colors = Some(v),
            Err(e) => {
                self.failures.insert(kind, e);
            }
        }
    }

    /// Adapters that produced a finding, in canonical order.
    pub fn succeeded(&self) -> Vec<ExpertKind> {
        let mut kinds = Vec::new();
        if self.web_entities.is_some() {
            kinds.push(ExpertKind::WebEntities);
        }
        if self.labels.is_some() {
            kinds.push(ExpertKind::Labels);
        }
        if self.objects.is_some() {
            kinds.push(ExpertKind::Objects);
        }
        if self.text.is_some() {
            kinds.push(ExpertKind::Text);
        }
        if self.colors.is_some() {
            kinds.push(ExpertKind::Colors);
        }
        kinds
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().len()
    }

    /// True when no expert produced any finding.
    pub fn is_empty(&self) -> bool {
        self.success_count() == 0
    }

    /// Labels sorted by descending score (highest-confidence first).
    pub fn labels_by_score(&self) -> Vec<&LabelAnnotation> {
        let mut labels: Vec<&LabelAnnotation> =
            self.labels.iter().flatten().collect();
        labels.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        labels
    }
}

/// Uniform wrapper around one external vision capability.
///
/// Implementations return `ExpertError` for every failure mode; nothing is
/// allowed to propagate past `observe`. Adapters are independent and must
/// not consult each other's output.
#[async_trait]
pub trait ExpertAdapter: Send + Sync {
    /// Stable adapter identity used to key the evidence set.
    fn kind(&self) -> ExpertKind;

    /// Run the expert against the (possibly cropped) input image.
    async fn observe(&self, image: &RawImage) -> Result<ExpertFinding, ExpertError>;
}

// ============================================================================
// Synthesis
// ============================================================================

/// Which synthesis strategy produced the attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    Generative,
    Heuristic,
}

impl SynthesisStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisStrategy::Generative => "generative",
            SynthesisStrategy::Heuristic => "heuristic",
        }
    }
}

impl std::fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Single structured product description reconciled from expert evidence.
///
/// Invariant: `confidence_score` is always defined, clamped to [0,1], and
/// present even when every expert failed (see [`MINIMAL_CONFIDENCE`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedAttributes {
    pub product_name: String,
    pub brand: String,
    pub category: String,
    pub sub_category: String,
    pub attributes: BTreeSet<String>,
    pub colors: BTreeSet<String>,
    pub confidence_score: f64,
    pub ai_summary: String,
    /// Per-expert corroboration in [0,1], keyed by adapter identity.
    pub expert_agreement: BTreeMap<String, f64>,
}

impl SynthesizedAttributes {
    /// Minimal result for the zero-successful-experts case: empty
    /// identification fields, fixed low confidence, never an error.
    pub fn minimal() -> Self {
        Self {
            product_name: String::new(),
            brand: String::new(),
            category: String::new(),
            sub_category: String::new(),
            attributes: BTreeSet::new(),
            colors: BTreeSet::new(),
            confidence_score: MINIMAL_CONFIDENCE,
            ai_summary: String::new(),
            expert_agreement: BTreeMap::new(),
        }
    }

    /// True when at least one identification field carries a value.
    pub fn has_identification(&self) -> bool {
        !self.product_name.is_empty()
            || !self.brand.is_empty()
            || !self.category.is_empty()
            || !self.attributes.is_empty()
    }
}

/// Clamp a confidence value into [0,1].
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

// ============================================================================
// Query variants
// ============================================================================

/// Origin of one marketplace query variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuerySource {
    Synthesizer,
    BrandHeuristic,
    FeatureHeuristic,
    GenericFallback,
}

impl QuerySource {
    /// Fixed confidence ladder, descending with source priority.
    ///
    /// Keeps "ordered by priority" and "ordered highest-confidence-first"
    /// consistent by construction, and pins brand before feature.
    pub fn base_confidence(&self) -> f64 {
        match self {
            QuerySource::Synthesizer => 90.0,
            QuerySource::BrandHeuristic => 75.0,
            QuerySource::FeatureHeuristic => 60.0,
            QuerySource::GenericFallback => 40.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuerySource::Synthesizer => "synthesizer",
            QuerySource::BrandHeuristic => "brand_heuristic",
            QuerySource::FeatureHeuristic => "feature_heuristic",
            QuerySource::GenericFallback => "generic_fallback",
        }
    }
}

/// One candidate marketplace search query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryVariant {
    pub query_text: String,
    /// Expected yield in [0,100].
    pub confidence: f64,
    pub source: QuerySource,
}

// ============================================================================
// Marketplace listings and comps
// ============================================================================

/// Marketplace listing returned by the gateway. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateListing {
    pub id: String,
    pub title: String,
    pub price: Option<f64>,
    pub image_url: String,
    pub canonical_url: String,
}

/// Candidate listing plus its visual similarity to the source photo.
///
/// Produced and owned by the re-ranker for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedComp {
    #[serde(flatten)]
    pub listing: CandidateListing,
    /// Cosine similarity in [0,1]; 0.0 for unfetchable images.
    pub visual_similarity_score: f64,
}

// ============================================================================
// Price analysis
// ============================================================================

/// Confidence tier for the price suggestion.
///
/// `High` is reserved on the scale but not currently emitted by the
/// analyzer (two-tier behavior until a dispersion threshold is validated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceConfidence {
    Low,
    Medium,
    High,
}

impl PriceConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceConfidence::Low => "Low",
            PriceConfidence::Medium => "Medium",
            PriceConfidence::High => "High",
        }
    }
}

impl std::fmt::Display for PriceConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary statistics over the priced comps.
///
/// Invariants: `sample_size < 3` forces `confidence_label = Low`;
/// `sample_size == 0` forces every price field to 0.0 instead of erroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAnalysis {
    /// (low, high) over included prices.
    pub price_range: (f64, f64),
    pub suggested_price: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; 0.0 below two prices.
    pub dispersion: f64,
    pub confidence_label: PriceConfidence,
    pub sample_size: usize,
}

impl PriceAnalysis {
    /// Defined zero state for the no-priced-comps case.
    pub fn empty() -> Self {
        Self {
            price_range: (0.0, 0.0),
            suggested_price: 0.0,
            mean: 0.0,
            median: 0.0,
            dispersion: 0.0,
            confidence_label: PriceConfidence::Low,
            sample_size: 0,
        }
    }
}

// ============================================================================
// Pipeline stages
// ============================================================================

/// Pipeline state machine.
///
/// `Failed` is reachable only from `Received` (invalid input); every later
/// stage degrades and advances instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStage {
    Received,
    Cropped,
    ExpertsDispatched,
    Synthesized,
    QueryBuilt,
    Searched,
    Reranked,
    Priced,
    Complete,
    Failed,
}

impl AnalysisStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStage::Received => "Received",
            AnalysisStage::Cropped => "Cropped",
            AnalysisStage::ExpertsDispatched => "ExpertsDispatched",
            AnalysisStage::Synthesized => "Synthesized",
            AnalysisStage::QueryBuilt => "QueryBuilt",
            AnalysisStage::Searched => "Searched",
            AnalysisStage::Reranked => "Reranked",
            AnalysisStage::Priced => "Priced",
            AnalysisStage::Complete => "Complete",
            AnalysisStage::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStage::Complete | AnalysisStage::Failed)
    }
}

impl std::fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
