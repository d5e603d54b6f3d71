//! Attribute synthesis
//!
//! Reconciles the expert evidence into one structured product
//! description. The generative strategy is preferred; every generative
//! failure degrades silently to the deterministic heuristic, with the
//! reason recorded in the outcome so the analysis summary can surface
//! it. Synthesis itself never fails.

pub mod generative;
pub mod heuristic;

pub use generative::{GenerativeAnswer, GenerativeClient, SynthesisError};

use crate::config::{GenerativeConfig, Lexicons};
use crate::types::{
    clamp_confidence, ExpertEvidence, ExpertKind, RawImage, SynthesisStrategy,
    SynthesizedAttributes,
};
use std::collections::{BTreeMap, BTreeSet};

/// Minimum word length considered when checking whether an expert's
/// finding is echoed in the synthesized attributes.
const MIN_AGREEMENT_WORD: usize = 3;

/// Synthesis result plus how it was produced.
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub attributes: SynthesizedAttributes,
    pub strategy: SynthesisStrategy,
    /// Set when the generative strategy was skipped or failed and the
    /// heuristic ran instead.
    pub degraded_reason: Option<String>,
}

/// Front-end over the two synthesis strategies.
pub struct Synthesizer {
    generative: Option<GenerativeClient>,
    lexicons: Lexicons,
}

impl Synthesizer {
    pub fn new(config: &GenerativeConfig, lexicons: Lexicons) -> Self {
        Self {
            generative: GenerativeClient::from_config(config),
            lexicons,
        }
    }

    /// Synthesizer that never calls the generative endpoint.
    pub fn heuristic_only(lexicons: Lexicons) -> Self {
        Self {
            generative: None,
            lexicons,
        }
    }

    /// Reconcile evidence into attributes. Infallible: zero successful
    /// experts yields the minimal result, and generative failures fall
    /// back to the heuristic.
    pub async fn synthesize(
        &self,
        image: &RawImage,
        evidence: &ExpertEvidence,
    ) -> SynthesisOutcome {
        if evidence.is_empty() {
            return SynthesisOutcome {
                attributes: SynthesizedAttributes::minimal(),
                strategy: SynthesisStrategy::Heuristic,
                degraded_reason: None,
            };
        }

        let degraded_reason = match &self.generative {
            Some(client) => match client.reason(image, evidence).await {
                Ok(answer) => {
                    return SynthesisOutcome {
                        attributes: finalize_generative(answer, evidence),
                        strategy: SynthesisStrategy::Generative,
                        degraded_reason: None,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "generative synthesis failed, falling back to heuristic"
                    );
                    Some(e.to_string())
                }
            },
            None => Some(SynthesisError::NotAvailable.to_string()),
        };

        let mut attributes = heuristic::synthesize(evidence, &self.lexicons);
        attributes.expert_agreement = agreement_scores(evidence, &attributes);
        SynthesisOutcome {
            attributes,
            strategy: SynthesisStrategy::Heuristic,
            degraded_reason,
        }
    }
}

/// Normalize a generative answer and weight its self-reported confidence
/// by how well the expert evidence corroborates it.
fn finalize_generative(
    answer: GenerativeAnswer,
    evidence: &ExpertEvidence,
) -> SynthesizedAttributes {
    let normalize_set = |values: Vec<String>| -> BTreeSet<String> {
        values
            .into_iter()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect()
    };

    let mut attrs = SynthesizedAttributes {
        product_name: answer.product_name.trim().to_string(),
        brand: answer.brand.trim().to_string(),
        category: answer.category.trim().to_lowercase(),
        sub_category: answer.sub_category.trim().to_lowercase(),
        attributes: normalize_set(answer.attributes),
        colors: normalize_set(answer.colors),
        confidence_score: 0.0,
        ai_summary: answer.summary.trim().to_string(),
        expert_agreement: BTreeMap::new(),
    };

    attrs.expert_agreement = agreement_scores(evidence, &attrs);
    let mean_agreement = if attrs.expert_agreement.is_empty() {
        1.0
    } else {
        attrs.expert_agreement.values().sum::<f64>() / attrs.expert_agreement.len() as f64
    };
    attrs.confidence_score = clamp_confidence(answer.confidence * (0.5 + 0.5 * mean_agreement));
    attrs
}

/// Per-expert corroboration of the final attributes, keyed by adapter
/// identity. Only experts that produced a finding appear.
fn agreement_scores(
    evidence: &ExpertEvidence,
    attrs: &SynthesizedAttributes,
) -> BTreeMap<String, f64> {
    let corpus = attribute_corpus(attrs);
    let mut scores = BTreeMap::new();

    for kind in evidence.succeeded() {
        let score = match kind {
            ExpertKind::WebEntities => {
                let echoed = evidence
                    .web_entities
                    .iter()
                    .flatten()
                    .any(|e| shares_word(&corpus, &e.description));
                if echoed {
                    1.0
                } else {
                    0.4
                }
            }
            ExpertKind::Labels => {
                let echoed = evidence
                    .labels
                    .iter()
                    .flatten()
                    .any(|l| shares_word(&corpus, &l.description));
                if echoed {
                    1.0
                } else {
                    0.4
                }
            }
            ExpertKind::Objects => {
                let echoed = evidence
                    .objects
                    .iter()
                    .flatten()
                    .any(|o| shares_word(&corpus, &o.name));
                if echoed {
                    1.0
                } else {
                    0.4
                }
            }
            ExpertKind::Text => match &evidence.text {
                Some(t) if !attrs.brand.is_empty()
                    && t.full_text.to_lowercase().contains(&attrs.brand.to_lowercase()) =>
                {
                    1.0
                }
                Some(t) if !t.full_text.trim().is_empty() => 0.6,
                _ => 0.2,
            },
            ExpertKind::Colors => {
                let echoed = evidence
                    .colors
                    .iter()
                    .flatten()
                    .any(|c| attrs.colors.contains(&c.name));
                if echoed {
                    1.0
                } else {
                    0.4
                }
            }
        };
        scores.insert(kind.as_str().to_string(), score);
    }

    scores
}

/// All attribute text lowercased into one searchable string.
fn attribute_corpus(attrs: &SynthesizedAttributes) -> String {
    let mut parts: Vec<String> = vec![
        attrs.product_name.clone(),
        attrs.brand.clone(),
        attrs.category.clone(),
        attrs.sub_category.clone(),
        attrs.ai_summary.clone(),
    ];
    parts.extend(attrs.attributes.iter().cloned());
    parts.extend(attrs.colors.iter().cloned());
    parts.join(" ").to_lowercase()
}

/// True when any sufficiently long word of `phrase` appears in `corpus`.
fn shares_word(corpus: &str, phrase: &str) -> bool {
    phrase
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() >= MIN_AGREEMENT_WORD)
        .any(|w| corpus.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        DominantColor, ExpertError, ExpertFinding, LabelAnnotation, TextBlock, MINIMAL_CONFIDENCE,
    };

    fn image() -> RawImage {
        RawImage::new(vec![0x89, 0x50, 0x4e, 0x47], "image/png")
    }

    fn labels_evidence() -> ExpertEvidence {
        let mut evidence = ExpertEvidence::default();
        evidence.record(
            ExpertKind::Labels,
            Ok(ExpertFinding::Labels(vec![
                LabelAnnotation {
                    description: "polo shirt".to_string(),
                    score: 0.95,
                },
                LabelAnnotation {
                    description: "cotton".to_string(),
                    score: 0.8,
                },
            ])),
        );
        evidence
    }

    #[tokio::test]
    async fn test_zero_evidence_yields_minimal_without_degradation() {
        let synthesizer = Synthesizer::heuristic_only(Lexicons::default());
        let mut evidence = ExpertEvidence::default();
        evidence.record(
            ExpertKind::Labels,
            Err(ExpertError::Network("down".to_string())),
        );

        let outcome = synthesizer.synthesize(&image(), &evidence).await;
        assert_eq!(outcome.attributes, SynthesizedAttributes::minimal());
        assert_eq!(outcome.attributes.confidence_score, MINIMAL_CONFIDENCE);
        assert_eq!(outcome.strategy, SynthesisStrategy::Heuristic);
        assert!(outcome.degraded_reason.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_generative_degrades_to_heuristic() {
        let synthesizer = Synthesizer::heuristic_only(Lexicons::default());
        let outcome = synthesizer.synthesize(&image(), &labels_evidence()).await;

        assert_eq!(outcome.strategy, SynthesisStrategy::Heuristic);
        assert_eq!(
            outcome.degraded_reason.as_deref(),
            Some("generative strategy not configured")
        );
        assert_eq!(outcome.attributes.category, "clothing");
        assert!(outcome.attributes.expert_agreement.contains_key("labels"));
    }

    #[test]
    fn test_agreement_rewards_echoed_labels() {
        let evidence = labels_evidence();
        let mut attrs = SynthesizedAttributes::minimal();
        attrs.sub_category = "polo shirt".to_string();

        let scores = agreement_scores(&evidence, &attrs);
        assert_eq!(scores.get("labels"), Some(&1.0));
    }

    #[test]
    fn test_agreement_penalizes_contradicted_colors() {
        let mut evidence = ExpertEvidence::default();
        evidence.record(
            ExpertKind::Colors,
            Ok(ExpertFinding::Colors(vec![DominantColor {
                name: "red".to_string(),
                rgb: (200, 30, 30),
                score: 0.5,
                pixel_fraction: 0.4,
            }])),
        );
        let mut attrs = SynthesizedAttributes::minimal();
        attrs.colors.insert("blue".to_string());

        let scores = agreement_scores(&evidence, &attrs);
        assert_eq!(scores.get("colors"), Some(&0.4));
    }

    #[test]
    fn test_agreement_text_scores_brand_echo_highest() {
        let mut evidence = ExpertEvidence::default();
        evidence.record(
            ExpertKind::Text,
            Ok(ExpertFinding::Text(TextBlock {
                full_text: "NIKE AIR".to_string(),
                locale: None,
            })),
        );

        let mut attrs = SynthesizedAttributes::minimal();
        attrs.brand = "Nike".to_string();
        assert_eq!(
            agreement_scores(&evidence, &attrs).get("text"),
            Some(&1.0)
        );

        attrs.brand.clear();
        assert_eq!(
            agreement_scores(&evidence, &attrs).get("text"),
            Some(&0.6)
        );
    }

    #[test]
    fn test_finalize_generative_full_corroboration_keeps_confidence() {
        let evidence = labels_evidence();
        let answer = GenerativeAnswer {
            product_name: "Ralph Lauren polo shirt".to_string(),
            brand: "Ralph Lauren".to_string(),
            category: "Clothing".to_string(),
            sub_category: "Polo Shirt".to_string(),
            attributes: vec!["Cotton".to_string(), " ".to_string()],
            colors: vec!["Navy".to_string()],
            confidence: 0.9,
            summary: "A navy Ralph Lauren polo shirt.".to_string(),
        };

        let attrs = finalize_generative(answer, &evidence);
        assert_eq!(attrs.category, "clothing", "category is normalized");
        assert!(attrs.attributes.contains("cotton"));
        assert!(!attrs.attributes.contains(" "), "blank entries dropped");
        // Labels echo the answer, so agreement is 1.0 and confidence is
        // the model's own value.
        assert!((attrs.confidence_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_finalize_generative_damps_uncorroborated_confidence() {
        let evidence = labels_evidence();
        let answer = GenerativeAnswer {
            product_name: "Vintage clock".to_string(),
            confidence: 0.9,
            ..GenerativeAnswer::default()
        };

        let attrs = finalize_generative(answer, &evidence);
        // Labels (polo shirt, cotton) never appear in the answer: 0.4
        // agreement damps 0.9 to 0.9 * 0.7.
        assert!((attrs.confidence_score - 0.63).abs() < 1e-9);
    }
}
