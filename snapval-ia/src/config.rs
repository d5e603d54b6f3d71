//! Configuration resolution for snapval-ia
//!
//! Values resolve in ENV → TOML → built-in-default priority. When the same
//! key is set in more than one source a warning is logged and the higher
//! tier wins. Secrets (API keys, the marketplace bearer token) are
//! expected from the environment in production; TOML entries exist for
//! development setups.

use serde::Deserialize;
use snapval_common::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Complete service configuration with every value resolved.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IaConfig {
    pub server: ServerConfig,
    pub vision: VisionConfig,
    pub generative: GenerativeConfig,
    pub detector: DetectorConfig,
    pub marketplace: MarketplaceConfig,
    pub experts: ExpertsConfig,
    pub reranker: RerankConfig,
    pub lexicons: Lexicons,
}

impl Default for IaConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            vision: VisionConfig::default(),
            generative: GenerativeConfig::default(),
            detector: DetectorConfig::default(),
            marketplace: MarketplaceConfig::default(),
            experts: ExpertsConfig::default(),
            reranker: RerankConfig::default(),
            lexicons: Lexicons::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5745 }
    }
}

/// Vision annotation service (shared by all five experts and the primary
/// crop localizer).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Cap on annotations requested per feature.
    pub max_results: u32,
    /// Outbound rate limit toward the vision service.
    pub requests_per_second: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://vision.googleapis.com/v1/images:annotate".to_string(),
            api_key: None,
            timeout_secs: 12,
            max_results: 10,
            requests_per_second: 8,
        }
    }
}

/// Generative-reasoning service used by the primary synthesis strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerativeConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 25,
        }
    }
}

/// Secondary region-detector service tried when the object localizer
/// yields no bounding box. Unset endpoint means the tier is skipped.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 6,
        }
    }
}

/// Marketplace search endpoint used by the HTTP facade's gateway.
/// Unset endpoint degrades every search to unavailable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub endpoint: Option<String>,
    pub bearer_token: Option<String>,
    pub default_limit: usize,
    pub timeout_secs: u64,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bearer_token: None,
            default_limit: 12,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExpertsConfig {
    /// Per-adapter call budget. One hung expert costs at most this much.
    pub call_timeout_ms: u64,
}

impl Default for ExpertsConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 12_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Per-candidate image fetch budget.
    pub fetch_timeout_secs: u64,
    /// Hard cap on candidates fed into re-ranking.
    pub max_candidates: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 8,
            max_candidates: 24,
        }
    }
}

// ============================================================================
// Lexicons
// ============================================================================

/// Keyword tables for the heuristic synthesis fallback.
///
/// Injected configuration rather than inline literals so brand and
/// category coverage can be extended (or unit-tested) without touching
/// synthesis control flow. Matching is case-insensitive; entries are
/// stored lowercase.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Lexicons {
    /// Known brand names, matched (fuzzily) against OCR text.
    pub brands: Vec<String>,
    /// Category name → label keywords that imply it.
    pub categories: BTreeMap<String, Vec<String>>,
    /// Garment/feature terms lifted from labels into attributes.
    pub features: Vec<String>,
}

impl Default for Lexicons {
    fn default() -> Self {
        let brands = [
            "adidas", "apple", "calvin klein", "carhartt", "champion", "coach",
            "columbia", "converse", "dyson", "gucci", "kitchenaid", "lacoste",
            "lego", "levi's", "levis", "new balance", "nike", "north face",
            "patagonia", "prada", "puma", "ralph lauren", "reebok", "samsung",
            "sony", "tommy hilfiger", "under armour", "uniqlo", "vans", "zara",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let mut categories = BTreeMap::new();
        categories.insert(
            "clothing".to_string(),
            vec![
                "shirt", "t-shirt", "polo", "polo shirt", "jacket", "coat",
                "dress", "jeans", "pants", "trousers", "sweater", "hoodie",
                "skirt", "shorts", "sleeve", "blouse", "cardigan", "vest",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        );
        categories.insert(
            "footwear".to_string(),
            vec!["shoe", "sneaker", "boot", "sandal", "loafer", "heel", "trainer"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        categories.insert(
            "bags".to_string(),
            vec!["bag", "backpack", "handbag", "purse", "tote", "wallet", "luggage"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        categories.insert(
            "electronics".to_string(),
            vec![
                "phone", "laptop", "camera", "headphones", "speaker", "tablet",
                "console", "monitor", "keyboard",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        );
        categories.insert(
            "home".to_string(),
            vec!["lamp", "chair", "table", "vase", "mug", "blender", "kettle", "cookware"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        categories.insert(
            "toys".to_string(),
            vec!["toy", "doll", "puzzle", "brick", "action figure", "plush"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        categories.insert(
            "jewelry".to_string(),
            vec!["ring", "necklace", "bracelet", "watch", "earrings"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        categories.insert(
            "sports".to_string(),
            vec!["bicycle", "skateboard", "racket", "golf club", "dumbbell", "helmet"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        let features = [
            "cotton", "wool", "leather", "denim", "silk", "linen", "polyester",
            "suede", "long sleeve", "short sleeve", "vintage", "slim fit",
            "waterproof", "wireless", "stainless steel", "ceramic", "knit",
            "striped", "plaid", "floral", "zip", "button",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            brands,
            categories,
            features,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl IaConfig {
    /// Load configuration: built-in defaults, overlaid by the TOML file
    /// (when present), overlaid by environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
                })?;
                let parsed: IaConfig = toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("Cannot parse config file {}: {}", path.display(), e))
                })?;
                info!("Configuration loaded from {}", path.display());
                parsed
            }
            None => {
                info!("No config file found, using built-in defaults");
                IaConfig::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Overlay environment variables onto the resolved configuration.
    /// ENV is the highest tier; a warning notes shadowed TOML values.
    fn apply_env_overrides(&mut self) {
        if let Some(port) = env_value("SNAPVAL_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.server.port = p,
                Err(_) => warn!("SNAPVAL_PORT is not a valid port number: {}", port),
            }
        }

        if let Some(endpoint) = env_value("SNAPVAL_VISION_ENDPOINT") {
            self.vision.endpoint = endpoint;
        }
        self.vision.api_key = resolve_secret(
            "vision API key",
            "SNAPVAL_VISION_API_KEY",
            self.vision.api_key.take(),
        );

        if let Some(endpoint) = env_value("SNAPVAL_GENERATIVE_ENDPOINT") {
            self.generative.endpoint = endpoint;
        }
        if let Some(model) = env_value("SNAPVAL_GENERATIVE_MODEL") {
            self.generative.model = model;
        }
        self.generative.api_key = resolve_secret(
            "generative API key",
            "SNAPVAL_GENERATIVE_API_KEY",
            self.generative.api_key.take(),
        );

        if let Some(endpoint) = env_value("SNAPVAL_DETECTOR_ENDPOINT") {
            self.detector.endpoint = Some(endpoint);
        }

        if let Some(endpoint) = env_value("SNAPVAL_MARKETPLACE_ENDPOINT") {
            self.marketplace.endpoint = Some(endpoint);
        }
        self.marketplace.bearer_token = resolve_secret(
            "marketplace bearer token",
            "SNAPVAL_MARKETPLACE_TOKEN",
            self.marketplace.bearer_token.take(),
        );
    }
}

/// Validate a credential value (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve a secret from ENV → TOML, warning when both are set.
fn resolve_secret(what: &str, env_var: &str, toml_value: Option<String>) -> Option<String> {
    let env_key = env_value(env_var).filter(|k| is_valid_key(k));
    let toml_key = toml_value.filter(|k| is_valid_key(k));

    let mut sources = Vec::new();
    if env_key.is_some() {
        sources.push("environment");
    }
    if toml_key.is_some() {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        warn!(
            "{} found in multiple sources: {}. Using environment (highest priority).",
            what,
            sources.join(", ")
        );
    }

    match (env_key, toml_key) {
        (Some(key), _) => {
            info!("{} loaded from environment variable", what);
            Some(key)
        }
        (None, Some(key)) => {
            info!("{} loaded from TOML config", what);
            Some(key)
        }
        (None, None) => None,
    }
}
