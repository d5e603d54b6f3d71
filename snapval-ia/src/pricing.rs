//! Comp price analysis
//!
//! Summary statistics over the prices of the visually ranked comps.
//! Listings without a price (or with junk non-positive prices) are
//! excluded from the sample; an empty sample produces the defined zero
//! state rather than an error.

use crate::types::{PriceAnalysis, PriceConfidence, RankedComp};

/// Sample sizes below this always report Low confidence.
const MIN_MEDIUM_SAMPLE: usize = 3;

/// Analyze the priced comps.
pub fn analyze(comps: &[RankedComp]) -> PriceAnalysis {
    let mut prices: Vec<f64> = comps
        .iter()
        .filter_map(|c| c.listing.price)
        .filter(|p| *p > 0.0)
        .collect();

    if prices.is_empty() {
        return PriceAnalysis::empty();
    }

    prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = prices.len();

    let mean = prices.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        prices[n / 2]
    } else {
        (prices[n / 2 - 1] + prices[n / 2]) / 2.0
    };
    let dispersion = if n < 2 {
        0.0
    } else {
        let variance = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        variance.sqrt()
    };

    let confidence_label = if n < MIN_MEDIUM_SAMPLE {
        PriceConfidence::Low
    } else {
        PriceConfidence::Medium
    };

    PriceAnalysis {
        price_range: (prices[0], prices[n - 1]),
        suggested_price: mean,
        mean,
        median,
        dispersion,
        confidence_label,
        sample_size: n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandidateListing;

    fn comps(prices: &[Option<f64>]) -> Vec<RankedComp> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| RankedComp {
                listing: CandidateListing {
                    id: format!("l{i}"),
                    title: format!("listing {i}"),
                    price: *price,
                    image_url: String::new(),
                    canonical_url: String::new(),
                },
                visual_similarity_score: 0.5,
            })
            .collect()
    }

    #[test]
    fn test_zero_comps_yield_defined_zero_state() {
        let analysis = analyze(&[]);
        assert_eq!(analysis, PriceAnalysis::empty());
        assert_eq!(analysis.sample_size, 0);
        assert_eq!(analysis.price_range, (0.0, 0.0));
        assert_eq!(analysis.confidence_label, PriceConfidence::Low);
    }

    #[test]
    fn test_unpriced_comps_are_excluded_from_sample() {
        let analysis = analyze(&comps(&[None, Some(10.0), None]));
        assert_eq!(analysis.sample_size, 1);
        assert_eq!(analysis.mean, 10.0);
        assert_eq!(analysis.dispersion, 0.0);
    }

    #[test]
    fn test_two_prices_report_low_confidence() {
        let analysis = analyze(&comps(&[Some(20.0), Some(30.0)]));
        assert_eq!(analysis.sample_size, 2);
        assert_eq!(analysis.confidence_label, PriceConfidence::Low);
        assert_eq!(analysis.mean, 25.0);
        assert_eq!(analysis.median, 25.0);
        assert_eq!(analysis.price_range, (20.0, 30.0));
    }

    #[test]
    fn test_three_prices_report_medium_confidence() {
        let analysis = analyze(&comps(&[Some(20.0), Some(25.0), Some(30.0)]));
        assert_eq!(analysis.sample_size, 3);
        assert_eq!(analysis.confidence_label, PriceConfidence::Medium);
    }

    #[test]
    fn test_twelve_price_sample_statistics() {
        let prices = [
            40.0, 45.0, 50.0, 55.0, 60.0, 42.0, 48.0, 52.0, 58.0, 44.0, 46.0, 49.0,
        ];
        let raw: Vec<Option<f64>> = prices.iter().map(|p| Some(*p)).collect();
        let analysis = analyze(&comps(&raw));

        assert_eq!(analysis.sample_size, 12);
        assert!((analysis.mean - 49.0833).abs() < 0.01);
        assert!((analysis.suggested_price - 49.0833).abs() < 0.01);
        assert_eq!(analysis.median, 48.5);
        assert_eq!(analysis.price_range, (40.0, 60.0));
        assert_eq!(analysis.confidence_label, PriceConfidence::Medium);
        assert!(analysis.dispersion > 0.0);
    }

    #[test]
    fn test_suggested_price_is_the_mean() {
        let analysis = analyze(&comps(&[Some(10.0), Some(100.0), Some(12.0)]));
        assert!((analysis.suggested_price - 40.666666).abs() < 1e-4);
        assert_eq!(analysis.suggested_price, analysis.mean);
        assert_eq!(analysis.median, 12.0);
    }

    #[test]
    fn test_non_positive_prices_are_junk() {
        let analysis = analyze(&comps(&[Some(0.0), Some(-5.0), Some(15.0)]));
        assert_eq!(analysis.sample_size, 1);
        assert_eq!(analysis.mean, 15.0);
    }
}
