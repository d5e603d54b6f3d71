//! Generative synthesis client
//!
//! Sends the photograph (as a base64 data URL) plus a compact digest of
//! the expert evidence to an OpenAI-compatible chat-completions endpoint
//! and parses the model's JSON answer. Any failure here is recoverable:
//! the synthesizer falls back to the heuristic strategy.

use crate::config::{is_valid_key, GenerativeConfig};
use crate::types::{ExpertEvidence, RawImage};
use crate::vision::USER_AGENT;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const MAX_ERROR_BODY: usize = 200;
const MAX_TEXT_EXCERPT: usize = 280;
const MAX_ANSWER_TOKENS: u32 = 500;

const SYSTEM_PROMPT: &str = "You are a resale listing analyst. Given a product photo and \
machine-vision evidence, identify the item. Respond with a single JSON object and nothing \
else, using exactly these keys: product_name, brand, category, sub_category, attributes \
(array of strings), colors (array of strings), confidence (number 0 to 1), summary \
(one sentence). Use empty strings or empty arrays for anything you cannot determine.";

/// Failure modes of the generative strategy. All of them degrade to the
/// heuristic fallback rather than failing the analysis.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SynthesisError {
    #[error("generative strategy not configured")]
    NotAvailable,
    #[error("network error: {0}")]
    Network(String),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("request timed out")]
    Timeout,
    #[error("answer out of schema: {0}")]
    Malformed(String),
}

/// Structured identification produced by the model.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GenerativeAnswer {
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub sub_category: String,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub summary: String,
}

/// Client for the OpenAI-compatible chat-completions endpoint.
pub struct GenerativeClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GenerativeClient {
    /// Returns None when no usable credential is configured or the HTTP
    /// client cannot be built; the caller then runs heuristic-only.
    pub fn from_config(config: &GenerativeConfig) -> Option<Self> {
        let api_key = config.api_key.as_deref().filter(|k| is_valid_key(k))?;

        let client = match reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "failed to build generative HTTP client, running heuristic-only"
                );
                return None;
            }
        };

        Some(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: api_key.to_string(),
        })
    }

    /// Ask the model to identify the item in the photo.
    pub async fn reason(
        &self,
        image: &RawImage,
        evidence: &ExpertEvidence,
    ) -> Result<GenerativeAnswer, SynthesisError> {
        let data_url = format!(
            "data:{};base64,{}",
            image.content_type(),
            image.to_base64()
        );
        let digest = evidence_digest(evidence);

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "text",
                            "text": format!(
                                "Identify this item for a resale listing. \
                                 Machine-vision evidence: {}",
                                digest
                            ),
                        },
                        {
                            "type": "image_url",
                            "image_url": { "url": data_url },
                        }
                    ]
                }
            ],
            "max_tokens": MAX_ANSWER_TOKENS,
            "temperature": 0.1,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SynthesisError::Timeout
                } else {
                    SynthesisError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                message: truncate(&message, MAX_ERROR_BODY),
            });
        }

        let envelope: ChatEnvelope = response
            .json()
            .await
            .map_err(|e| SynthesisError::Malformed(e.to_string()))?;

        let content = envelope
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| SynthesisError::Malformed("empty choices".to_string()))?;

        parse_answer(content)
    }
}

/// Parse the model's reply, tolerating markdown code fences.
pub fn parse_answer(content: &str) -> Result<GenerativeAnswer, SynthesisError> {
    let stripped = strip_code_fences(content);
    serde_json::from_str(stripped).map_err(|e| SynthesisError::Malformed(e.to_string()))
}

/// Compact JSON digest of the evidence for the model prompt. Caps every
/// list so a noisy photo never blows up the request.
pub fn evidence_digest(evidence: &ExpertEvidence) -> serde_json::Value {
    let mut digest = serde_json::Map::new();

    let labels: Vec<serde_json::Value> = evidence
        .labels_by_score()
        .iter()
        .take(8)
        .map(|l| serde_json::json!({ "label": l.description, "score": round2(l.score) }))
        .collect();
    if !labels.is_empty() {
        digest.insert("labels".to_string(), labels.into());
    }

    let entities: Vec<String> = evidence
        .web_entities
        .iter()
        .flatten()
        .take(5)
        .map(|e| e.description.clone())
        .collect();
    if !entities.is_empty() {
        digest.insert("web_entities".to_string(), entities.into());
    }

    let objects: Vec<String> = evidence
        .objects
        .iter()
        .flatten()
        .take(5)
        .map(|o| o.name.clone())
        .collect();
    if !objects.is_empty() {
        digest.insert("objects".to_string(), objects.into());
    }

    if let Some(text) = &evidence.text {
        let trimmed = text.full_text.trim();
        if !trimmed.is_empty() {
            digest.insert(
                "visible_text".to_string(),
                truncate(trimmed, MAX_TEXT_EXCERPT).into(),
            );
        }
    }

    let colors: Vec<String> = evidence
        .colors
        .iter()
        .flatten()
        .take(4)
        .map(|c| c.name.clone())
        .collect();
    if !colors.is_empty() {
        digest.insert("dominant_colors".to_string(), colors.into());
    }

    serde_json::Value::Object(digest)
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Deserialize)]
struct ChatEnvelope {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}
