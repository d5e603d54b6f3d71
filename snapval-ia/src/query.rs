//! Marketplace query construction
//!
//! Turns synthesized attributes into an ordered sequence of search query
//! variants, highest expected yield first. Building is pure: the same
//! attributes always produce the same variants in the same order, so a
//! restarted search can resume from any variant.

use crate::types::{QuerySource, QueryVariant, SynthesizedAttributes};

/// Attribute terms folded into the feature-focused variant.
const MAX_FEATURE_TERMS: usize = 3;
/// Attribute terms folded into the generic fallback variant.
const MAX_GENERIC_TERMS: usize = 3;

/// Build query variants in priority order.
///
/// Produces up to four variants: the synthesizer's own summary, a
/// brand-led query when the brand is missing from that summary, a
/// feature-focused query, and a generic fallback. Empty variants are
/// skipped and later variants that repeat an earlier query text are
/// dropped, so the result may be shorter than four, or empty when the
/// attributes carry nothing searchable.
pub fn build_variants(attrs: &SynthesizedAttributes) -> Vec<QueryVariant> {
    let mut variants: Vec<QueryVariant> = Vec::new();

    let summary = query_text_from_summary(&attrs.ai_summary);
    if let Some(text) = &summary {
        push_unique(&mut variants, text.clone(), QuerySource::Synthesizer);
    }

    if !attrs.brand.is_empty() {
        let summary_has_brand = summary
            .as_deref()
            .map(|s| s.to_lowercase().contains(&attrs.brand.to_lowercase()))
            .unwrap_or(false);
        if !summary_has_brand {
            let text = brand_query(attrs);
            push_unique(&mut variants, text, QuerySource::BrandHeuristic);
        }
    }

    push_unique(&mut variants, feature_query(attrs), QuerySource::FeatureHeuristic);
    push_unique(&mut variants, generic_query(attrs), QuerySource::GenericFallback);

    variants
}

/// Normalize the free-form summary into query text: collapse whitespace
/// and drop trailing sentence punctuation.
fn query_text_from_summary(summary: &str) -> Option<String> {
    let collapsed = collapse(summary);
    let trimmed = collapsed.trim_end_matches(['.', '!', '?']).trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn brand_query(attrs: &SynthesizedAttributes) -> String {
    let mut parts: Vec<&str> = vec![attrs.brand.as_str()];
    if !attrs.sub_category.is_empty() {
        parts.push(attrs.sub_category.as_str());
    } else if !attrs.category.is_empty() {
        parts.push(attrs.category.as_str());
    } else if let Some(first) = attrs.attributes.iter().next() {
        parts.push(first.as_str());
    }
    parts.join(" ")
}

fn feature_query(attrs: &SynthesizedAttributes) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !attrs.sub_category.is_empty() {
        parts.push(attrs.sub_category.as_str());
    }
    parts.extend(
        attrs
            .attributes
            .iter()
            .map(|a| a.as_str())
            .filter(|a| *a != attrs.sub_category)
            .take(MAX_FEATURE_TERMS),
    );
    if let Some(color) = attrs.colors.iter().next() {
        parts.push(color.as_str());
    }
    parts.join(" ")
}

fn generic_query(attrs: &SynthesizedAttributes) -> String {
    let parts: Vec<&str> = attrs
        .attributes
        .iter()
        .map(|a| a.as_str())
        .take(MAX_GENERIC_TERMS)
        .collect();
    if parts.is_empty() {
        attrs.category.clone()
    } else {
        parts.join(" ")
    }
}

/// Append a variant unless its text is empty or repeats an earlier one.
fn push_unique(variants: &mut Vec<QueryVariant>, text: String, source: QuerySource) {
    if text.is_empty() {
        return;
    }
    let lowered = text.to_lowercase();
    if variants.iter().any(|v| v.query_text.to_lowercase() == lowered) {
        return;
    }
    variants.push(QueryVariant {
        query_text: text,
        confidence: source.base_confidence(),
        source,
    });
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
