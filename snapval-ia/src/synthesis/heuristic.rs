//! Deterministic heuristic synthesis
//!
//! Rule-based fallback used when the generative strategy is unavailable
//! or answers out of schema. Evidence precedence: OCR text outranks
//! labels, labels outrank generic object detections.
//!
//! Confidence is a fixed weighted sum per signal type, capped at 100 and
//! scaled to [0,1]. The weights sum to exactly 100 when every signal
//! fires.

use crate::config::Lexicons;
use crate::experts::colors::palette_names;
use crate::types::{clamp_confidence, ExpertEvidence, SynthesizedAttributes, TextBlock};
use std::collections::BTreeSet;

/// Brand recognized in OCR text.
const W_BRAND_TEXT: f64 = 35.0;
/// Any usable OCR text at all.
const W_TEXT_PRESENT: f64 = 10.0;
/// Category resolved from the label set.
const W_CATEGORY_LABEL: f64 = 25.0;
/// Each corroborating label beyond the first (capped).
const W_SUPPORT_LABEL: f64 = 5.0;
const MAX_SUPPORT_LABELS: usize = 3;
/// Colors reported by the color expert.
const W_COLORS: f64 = 10.0;
/// Any localized object present.
const W_OBJECTS: f64 = 5.0;

/// Minimum fuzzy similarity for a single OCR word to count as a brand.
const BRAND_FUZZY_THRESHOLD: f64 = 0.85;

/// Synthesize attributes from raw evidence with lexicon-driven rules.
pub fn synthesize(evidence: &ExpertEvidence, lexicons: &Lexicons) -> SynthesizedAttributes {
    if evidence.is_empty() {
        return SynthesizedAttributes::minimal();
    }

    let mut score = 0.0;

    // Text evidence (highest precedence)
    let brand = evidence
        .text
        .as_ref()
        .and_then(|t| detect_brand(t, &lexicons.brands));
    let has_text = evidence
        .text
        .as_ref()
        .map(|t| !t.full_text.trim().is_empty())
        .unwrap_or(false);
    if brand.is_some() {
        score += W_BRAND_TEXT;
    }
    if has_text {
        score += W_TEXT_PRESENT;
    }

    // Label evidence
    let ranked_labels = evidence.labels_by_score();
    let category_match = ranked_labels
        .iter()
        .find_map(|label| match_category(&label.description, lexicons));
    let (category, sub_category) = match &category_match {
        Some((cat, label)) => (cat.clone(), label.clone()),
        None => {
            // Generic object evidence, lowest precedence
            let from_objects = evidence.objects.iter().flatten().find_map(|o| {
                match_category(&o.name, lexicons).map(|(cat, name)| (cat, name))
            });
            from_objects.unwrap_or_default()
        }
    };
    if category_match.is_some() {
        score += W_CATEGORY_LABEL;
        let support = ranked_labels.len().saturating_sub(1).min(MAX_SUPPORT_LABELS);
        score += support as f64 * W_SUPPORT_LABEL;
    }

    // Color evidence
    let mut colors: BTreeSet<String> = evidence
        .colors
        .iter()
        .flatten()
        .filter(|c| c.pixel_fraction > 0.03 || c.score > 0.1)
        .take(3)
        .map(|c| c.name.clone())
        .collect();
    if !colors.is_empty() {
        score += W_COLORS;
    } else {
        // Infer from label text when the color expert gave nothing
        for label in &ranked_labels {
            let lowered = label.description.to_lowercase();
            for name in palette_names() {
                if lowered.split_whitespace().any(|w| w == name) {
                    colors.insert(name.to_string());
                }
            }
        }
    }

    if evidence.objects.as_ref().map(|o| !o.is_empty()).unwrap_or(false) {
        score += W_OBJECTS;
    }

    // Attributes: feature-lexicon hits plus the strongest raw labels
    let mut attributes: BTreeSet<String> = BTreeSet::new();
    let text_lower = evidence
        .text
        .as_ref()
        .map(|t| t.full_text.to_lowercase())
        .unwrap_or_default();
    for feature in &lexicons.features {
        let in_labels = ranked_labels
            .iter()
            .any(|l| l.description.to_lowercase().contains(feature.as_str()));
        if in_labels || text_lower.contains(feature.as_str()) {
            attributes.insert(feature.clone());
        }
    }
    for label in ranked_labels.iter().take(3) {
        attributes.insert(label.description.to_lowercase());
    }

    let brand = brand.unwrap_or_default();
    let product_name = match (brand.is_empty(), sub_category.is_empty()) {
        (false, false) => format!("{} {}", brand, sub_category),
        (false, true) => brand.clone(),
        (true, false) => sub_category.clone(),
        (true, true) => String::new(),
    };

    let ai_summary = summary_line(&brand, &sub_category, &attributes, &colors);

    let confidence_score = clamp_confidence(score.min(100.0) / 100.0);

    SynthesizedAttributes {
        product_name,
        brand,
        category,
        sub_category,
        attributes,
        colors,
        confidence_score,
        ai_summary,
        // Filled by the synthesizer front-end, which sees the evidence
        // and the final attributes together.
        expert_agreement: Default::default(),
    }
}

/// Match OCR text against the brand lexicon.
///
/// Multi-word brands match by containment; single words also match
/// fuzzily to absorb OCR noise.
pub fn detect_brand(text: &TextBlock, brands: &[String]) -> Option<String> {
    let lowered = text.full_text.to_lowercase();
    if lowered.trim().is_empty() {
        return None;
    }

    for brand in brands {
        if lowered.contains(brand.as_str()) {
            return Some(capitalize_words(brand));
        }
    }

    for word in text.words() {
        for brand in brands {
            if !brand.contains(' ')
                && strsim::normalized_levenshtein(&word, brand) >= BRAND_FUZZY_THRESHOLD
            {
                return Some(capitalize_words(brand));
            }
        }
    }

    None
}

/// First category whose keyword set matches the term.
/// Returns (category name, normalized matching term).
fn match_category(term: &str, lexicons: &Lexicons) -> Option<(String, String)> {
    let lowered = term.to_lowercase();
    for (category, keywords) in &lexicons.categories {
        for keyword in keywords {
            if lowered == *keyword
                || lowered.contains(keyword.as_str())
                || keyword.contains(lowered.as_str())
            {
                return Some((category.clone(), lowered));
            }
        }
    }
    None
}

fn summary_line(
    brand: &str,
    sub_category: &str,
    attributes: &BTreeSet<String>,
    colors: &BTreeSet<String>,
) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !brand.is_empty() {
        parts.push(brand);
    }
    if !sub_category.is_empty() {
        parts.push(sub_category);
    }
    if let Some(color) = colors.iter().next() {
        parts.push(color);
    }
    if let Some(feature) = attributes
        .iter()
        .find(|a| a.as_str() != sub_category && !parts.contains(&a.as_str()))
    {
        parts.push(feature);
    }
    parts.join(" ")
}

fn capitalize_words(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
