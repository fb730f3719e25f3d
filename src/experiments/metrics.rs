//! Per-variant performance aggregation.
//!
//! Sums the raw performance rows recorded for each variant's campaign, derives
//! CTR, conversion rate, CPC and CPA, and persists the aggregates back onto the
//! variant. A campaign with no rows aggregates to all-zero metrics.

use std::sync::Arc;

use super::config::{AbTest, PerformanceTotals, StoreError, Variant, VariantMetrics};
use super::store::TestStore;

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Derives ratio metrics from summed counters. Every ratio is 0 when its
/// denominator is 0.
pub fn derive_metrics(totals: &PerformanceTotals, updated_at: i64) -> VariantMetrics {
    let impressions = totals.impressions as f64;
    let clicks = totals.clicks as f64;
    let conversions = totals.conversions as f64;
    VariantMetrics {
        impressions: totals.impressions,
        clicks: totals.clicks,
        conversions: totals.conversions,
        cost: totals.cost,
        ctr: ratio(clicks, impressions),
        conversion_rate: ratio(conversions, clicks),
        cpc: ratio(totals.cost, clicks),
        cpa: ratio(totals.cost, conversions),
        updated_at: Some(updated_at),
    }
}

pub struct MetricsAggregator {
    store: Arc<dyn TestStore>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn TestStore>) -> Self {
        Self { store }
    }

    /// Aggregates every variant of `test`, persists the results and returns
    /// the variants with fresh metrics in their original order.
    pub fn aggregate(&self, test: &AbTest, now_ms: i64) -> Result<Vec<Variant>, StoreError> {
        let mut variants = Vec::with_capacity(test.variants.len());
        for variant in &test.variants {
            let totals = self
                .store
                .read_performance_totals(&variant.external_campaign_ref)?;
            let metrics = derive_metrics(&totals, now_ms);
            self.store
                .upsert_variant_metrics(&test.id, &variant.id, &metrics)?;

            tracing::debug!(
                test_id = %test.id,
                variant_id = %variant.id,
                impressions = metrics.impressions,
                clicks = metrics.clicks,
                cost = metrics.cost,
                ctr = metrics.ctr,
                cpc = metrics.cpc,
                "Aggregated variant metrics"
            );

            let mut updated = variant.clone();
            updated.metrics = metrics;
            variants.push(updated);
        }
        Ok(variants)
    }
}
