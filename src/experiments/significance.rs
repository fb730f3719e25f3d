//! Winner selection for the two test dimensions.
//!
//! Creative tests compare the two highest-CTR variants with a pooled
//! two-proportion z-test. Strategy tests compare the two cheapest variants by
//! CPC and call a winner once the relative CPC reduction reaches a threshold;
//! that path reports a heuristic confidence, not a p-value.

use serde::Serialize;

use super::config::{AbTest, TestDimension, Variant};
use super::stats;

/// Minimum relative CPC reduction for a strategy winner (inclusive).
pub const DEFAULT_MIN_CPC_IMPROVEMENT: f64 = 0.05;

const HEURISTIC_CONFIDENCE_BASE: f64 = 0.7;
const HEURISTIC_CONFIDENCE_CAP: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignificanceResult {
    pub dimension: TestDimension,
    /// z-score for creative tests, CPC improvement for strategy tests.
    pub statistic: f64,
    /// Only set for creative tests.
    pub p_value: Option<f64>,
    pub confidence_interval_lower: Option<f64>,
    pub confidence_interval_upper: Option<f64>,
    pub is_significant: bool,
    pub has_winner: bool,
    /// Best-ranked variant, reported even when nothing is significant.
    pub winner_variant_id: Option<String>,
    pub total_sample_size: u64,
    /// Only set for strategy tests.
    pub heuristic_confidence: Option<f64>,
    pub cpc_improvement: Option<f64>,
}

impl SignificanceResult {
    fn undecided(dimension: TestDimension, total_sample_size: u64) -> Self {
        Self {
            dimension,
            statistic: 0.0,
            p_value: match dimension {
                TestDimension::Creative => Some(1.0),
                TestDimension::Strategy => None,
            },
            confidence_interval_lower: None,
            confidence_interval_upper: None,
            is_significant: false,
            has_winner: false,
            winner_variant_id: None,
            total_sample_size,
            heuristic_confidence: match dimension {
                TestDimension::Creative => None,
                TestDimension::Strategy => Some(0.0),
            },
            cpc_improvement: None,
        }
    }

    /// Whether the rollout should run for this result.
    pub fn should_roll_out(&self) -> bool {
        self.has_winner && self.is_significant && self.winner_variant_id.is_some()
    }

    /// Confidence recorded on a concluded test: 1 - p for creative tests,
    /// the heuristic value for strategy tests.
    pub fn confidence(&self) -> f64 {
        match self.p_value {
            Some(p) => 1.0 - p,
            None => self.heuristic_confidence.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignificanceEngine {
    min_cpc_improvement: f64,
}

impl Default for SignificanceEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CPC_IMPROVEMENT)
    }
}

impl SignificanceEngine {
    pub fn new(min_cpc_improvement: f64) -> Self {
        Self {
            min_cpc_improvement,
        }
    }

    /// Pure: identical inputs always give identical results.
    pub fn evaluate(&self, test: &AbTest, variants: &[Variant]) -> SignificanceResult {
        match test.dimension {
            TestDimension::Creative => self.evaluate_creative(test, variants),
            TestDimension::Strategy => self.evaluate_strategy(test, variants),
        }
    }

    fn evaluate_creative(&self, test: &AbTest, variants: &[Variant]) -> SignificanceResult {
        let total_sample_size: u64 = variants.iter().map(|v| v.metrics.clicks).sum();
        if variants.len() < 2 {
            return SignificanceResult::undecided(TestDimension::Creative, total_sample_size);
        }

        let mut ranked: Vec<&Variant> = variants.iter().collect();
        ranked.sort_by(|a, b| b.metrics.ctr.total_cmp(&a.metrics.ctr));
        let best = ranked[0];
        let control = ranked[1];

        let z = stats::two_proportion_z_test(
            best.metrics.clicks,
            best.metrics.impressions,
            control.metrics.clicks,
            control.metrics.impressions,
            test.confidence_level,
        );
        let enough_samples = total_sample_size >= test.min_sample_size;

        SignificanceResult {
            dimension: TestDimension::Creative,
            statistic: z.z_score,
            p_value: Some(z.p_value),
            confidence_interval_lower: Some(z.ci_lower),
            confidence_interval_upper: Some(z.ci_upper),
            is_significant: z.significant,
            has_winner: enough_samples && z.significant,
            winner_variant_id: Some(best.id.clone()),
            total_sample_size,
            heuristic_confidence: None,
            cpc_improvement: None,
        }
    }

    fn evaluate_strategy(&self, test: &AbTest, variants: &[Variant]) -> SignificanceResult {
        let mut with_clicks: Vec<&Variant> =
            variants.iter().filter(|v| v.metrics.clicks > 0).collect();
        if with_clicks.len() < 2 {
            return SignificanceResult::undecided(TestDimension::Strategy, 0);
        }

        let cpc = |v: &Variant| v.metrics.cost / v.metrics.clicks as f64;
        with_clicks.sort_by(|a, b| cpc(*a).total_cmp(&cpc(*b)));
        let best = with_clicks[0];
        let control = with_clicks[1];

        let improvement = stats::cpc_improvement(cpc(best), cpc(control));
        let total_sample_size: u64 = variants.iter().map(|v| v.metrics.clicks).sum();
        let enough_samples = total_sample_size >= test.min_sample_size;
        let is_significant = enough_samples && improvement >= self.min_cpc_improvement;

        let heuristic_confidence = if is_significant {
            HEURISTIC_CONFIDENCE_CAP.min(HEURISTIC_CONFIDENCE_BASE + improvement)
        } else {
            0.0
        };

        SignificanceResult {
            dimension: TestDimension::Strategy,
            statistic: improvement,
            p_value: None,
            confidence_interval_lower: None,
            confidence_interval_upper: None,
            is_significant,
            has_winner: is_significant,
            winner_variant_id: Some(best.id.clone()),
            total_sample_size,
            heuristic_confidence: Some(heuristic_confidence),
            cpc_improvement: Some(improvement),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::config::*;

    fn variant(id: &str, impressions: u64, clicks: u64, cost: f64) -> Variant {
        let ctr = if impressions > 0 {
            clicks as f64 / impressions as f64
        } else {
            0.0
        };
        let cpc = if clicks > 0 { cost / clicks as f64 } else { 0.0 };
        Variant {
            id: id.to_string(),
            name: id.to_string(),
            campaign_id: format!("c-{}", id),
            external_campaign_ref: format!("g-{}", id),
            account_ref: "acct".to_string(),
            creative_id: None,
            traffic_allocation: 0.5,
            budget_amount: 10.0,
            campaign_status: CampaignStatus::Enabled,
            bid: BidConfig::default(),
            metrics: VariantMetrics {
                impressions,
                clicks,
                conversions: 0,
                cost,
                ctr,
                conversion_rate: 0.0,
                cpc,
                cpa: 0.0,
                updated_at: None,
            },
        }
    }

    fn test(dimension: TestDimension, min_sample_size: u64) -> AbTest {
        AbTest {
            id: "t".to_string(),
            name: "t".to_string(),
            dimension,
            status: TestStatus::Running,
            auto_monitor: true,
            min_sample_size,
            confidence_level: 0.95,
            started_at: 0,
            ends_at: None,
            winner_variant_id: None,
            statistical_confidence: None,
            completed_at: None,
            processing_lease_until: None,
            lease_owner: None,
            variants: Vec::new(),
        }
    }

    // ── Creative ────────────────────────────────────────────────────

    #[test]
    fn creative_clear_winner() {
        let t = test(TestDimension::Creative, 100);
        let vs = vec![variant("b", 1000, 40, 0.0), variant("a", 1000, 80, 0.0)];
        let r = SignificanceEngine::default().evaluate(&t, &vs);
        assert!(r.is_significant);
        assert!(r.has_winner);
        assert!(r.should_roll_out());
        assert_eq!(r.winner_variant_id.as_deref(), Some("a"));
        assert_eq!(r.total_sample_size, 120);
        assert!(r.statistic > 0.0);
        assert!(r.confidence() > 0.99);
        assert!(r.heuristic_confidence.is_none());
    }

    #[test]
    fn creative_no_winner_yet() {
        let t = test(TestDimension::Creative, 100);
        let vs = vec![variant("a", 1000, 50, 0.0), variant("b", 1000, 45, 0.0)];
        let r = SignificanceEngine::default().evaluate(&t, &vs);
        assert!(!r.is_significant);
        assert!(!r.has_winner);
        assert!(!r.should_roll_out());
        // Leader is still reported.
        assert_eq!(r.winner_variant_id.as_deref(), Some("a"));
    }

    #[test]
    fn creative_significant_but_under_sample_size_has_no_winner() {
        let t = test(TestDimension::Creative, 500);
        let vs = vec![variant("a", 1000, 80, 0.0), variant("b", 1000, 40, 0.0)];
        let r = SignificanceEngine::default().evaluate(&t, &vs);
        assert!(r.is_significant);
        assert!(!r.has_winner);
        assert!(!r.should_roll_out());
    }

    #[test]
    fn creative_all_zero_is_never_significant() {
        let t = test(TestDimension::Creative, 1);
        let vs = vec![
            variant("a", 0, 0, 0.0),
            variant("b", 0, 0, 0.0),
            variant("c", 0, 0, 0.0),
        ];
        let r = SignificanceEngine::default().evaluate(&t, &vs);
        assert!(!r.is_significant);
        assert_eq!(r.p_value, Some(1.0));
        assert_eq!(r.statistic, 0.0);
    }

    #[test]
    fn creative_compares_only_top_two_of_three() {
        let t = test(TestDimension::Creative, 10);
        let vs = vec![
            variant("low", 1000, 10, 0.0),
            variant("top", 1000, 60, 0.0),
            variant("mid", 1000, 58, 0.0),
        ];
        let r = SignificanceEngine::default().evaluate(&t, &vs);
        assert_eq!(r.winner_variant_id.as_deref(), Some("top"));
        // top vs mid is close even though top vs low is not.
        assert!(!r.is_significant);
        assert_eq!(r.total_sample_size, 128);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let t = test(TestDimension::Creative, 100);
        let vs = vec![variant("a", 1234, 77, 0.0), variant("b", 987, 41, 0.0)];
        let engine = SignificanceEngine::default();
        assert_eq!(engine.evaluate(&t, &vs), engine.evaluate(&t, &vs));
    }

    // ── Strategy ────────────────────────────────────────────────────

    #[test]
    fn strategy_clear_winner() {
        let t = test(TestDimension::Strategy, 80);
        let vs = vec![variant("a", 0, 50, 100.0), variant("b", 0, 50, 150.0)];
        let r = SignificanceEngine::default().evaluate(&t, &vs);
        assert!(r.is_significant);
        assert!(r.has_winner);
        assert_eq!(r.winner_variant_id.as_deref(), Some("a"));
        let improvement = r.cpc_improvement.unwrap();
        assert!((improvement - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(r.heuristic_confidence, Some(0.95));
        assert_eq!(r.p_value, None);
        assert_eq!(r.confidence(), 0.95);
    }

    #[test]
    fn strategy_exact_five_percent_is_significant() {
        let t = test(TestDimension::Strategy, 100);
        // CPC 0.95 vs 1.00 -> exactly 5% improvement.
        let vs = vec![variant("a", 0, 100, 95.0), variant("b", 0, 100, 100.0)];
        let r = SignificanceEngine::default().evaluate(&t, &vs);
        assert!(
            r.cpc_improvement.unwrap() >= DEFAULT_MIN_CPC_IMPROVEMENT,
            "improvement={:?}",
            r.cpc_improvement
        );
        assert!(r.is_significant);
        assert!((r.heuristic_confidence.unwrap() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn strategy_just_below_five_percent_is_not_significant() {
        let t = test(TestDimension::Strategy, 100);
        // CPC 0.9501 vs 1.00 -> 4.99% improvement.
        let vs = vec![variant("a", 0, 100, 95.01), variant("b", 0, 100, 100.0)];
        let r = SignificanceEngine::default().evaluate(&t, &vs);
        assert!(r.cpc_improvement.unwrap() < DEFAULT_MIN_CPC_IMPROVEMENT);
        assert!(!r.is_significant);
        assert_eq!(r.heuristic_confidence, Some(0.0));
    }

    #[test]
    fn strategy_needs_two_variants_with_clicks() {
        let t = test(TestDimension::Strategy, 1);
        let vs = vec![variant("a", 100, 10, 5.0), variant("b", 100, 0, 0.0)];
        let r = SignificanceEngine::default().evaluate(&t, &vs);
        assert!(!r.is_significant);
        assert!(!r.has_winner);
        assert_eq!(r.winner_variant_id, None);
        assert_eq!(r.total_sample_size, 0);
    }

    #[test]
    fn strategy_under_sample_size_is_not_significant() {
        let t = test(TestDimension::Strategy, 1000);
        let vs = vec![variant("a", 0, 50, 100.0), variant("b", 0, 50, 150.0)];
        let r = SignificanceEngine::default().evaluate(&t, &vs);
        assert!(!r.is_significant);
        assert_eq!(r.winner_variant_id.as_deref(), Some("a"));
    }

    #[test]
    fn custom_threshold_is_respected() {
        let t = test(TestDimension::Strategy, 10);
        let vs = vec![variant("a", 0, 50, 90.0), variant("b", 0, 50, 100.0)];
        let strict = SignificanceEngine::new(0.2);
        assert!(!strict.evaluate(&t, &vs).is_significant);
        assert!(SignificanceEngine::default().evaluate(&t, &vs).is_significant);
    }
}
