//! Exposure-driven bid adjustment.
//!
//! Rule A raises every variant's max CPC when a test has run for a while but
//! collected too few impressions. Rule B flags a test that has produced no
//! clicks at all. Neither rule remembers that it already fired: while the
//! trigger holds, Rule A compounds on every cycle.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::config::{AbTest, BidAdjustmentEvent, BidAdjustmentReason, Variant};
use super::store::TestStore;
use crate::notify::{NotificationEvent, NotificationKind, Notifier, Severity};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BidRules {
    pub under_exposure_after_hours: f64,
    /// Rule A fires below this fraction of `min_sample_size` impressions.
    pub min_exposure_fraction: f64,
    pub raise_factor: f64,
    pub dead_test_after_hours: f64,
}

impl Default for BidRules {
    fn default() -> Self {
        Self {
            under_exposure_after_hours: 24.0,
            min_exposure_fraction: 0.10,
            raise_factor: 1.20,
            dead_test_after_hours: 48.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BidOutcome {
    pub raised: Vec<BidAdjustmentEvent>,
    pub dead_test_alert: bool,
}

pub struct AdaptiveBidController {
    rules: BidRules,
    store: Arc<dyn TestStore>,
    notifier: Arc<dyn Notifier>,
}

impl AdaptiveBidController {
    pub fn new(rules: BidRules, store: Arc<dyn TestStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            rules,
            store,
            notifier,
        }
    }

    pub fn rules(&self) -> &BidRules {
        &self.rules
    }

    pub fn is_under_exposed(&self, test: &AbTest, variants: &[Variant], now_ms: i64) -> bool {
        let impressions: u64 = variants.iter().map(|v| v.metrics.impressions).sum();
        test.hours_running(now_ms) >= self.rules.under_exposure_after_hours
            && (impressions as f64) < test.min_sample_size as f64 * self.rules.min_exposure_fraction
    }

    pub fn is_dead(&self, test: &AbTest, variants: &[Variant], now_ms: i64) -> bool {
        let clicks: u64 = variants.iter().map(|v| v.metrics.clicks).sum();
        test.hours_running(now_ms) >= self.rules.dead_test_after_hours && clicks == 0
    }

    pub async fn evaluate(&self, test: &AbTest, variants: &[Variant], now_ms: i64) -> BidOutcome {
        let mut outcome = BidOutcome::default();
        let hours = test.hours_running(now_ms);

        if self.is_under_exposed(test, variants, now_ms) {
            let impressions: u64 = variants.iter().map(|v| v.metrics.impressions).sum();
            tracing::warn!(
                test_id = %test.id,
                hours_running = hours,
                impressions,
                min_sample_size = test.min_sample_size,
                "Test under-exposed, raising bids"
            );
            for variant in variants {
                if let Some(event) = self.raise_bid(test, variant, now_ms) {
                    outcome.raised.push(event);
                }
            }
            if !outcome.raised.is_empty() {
                let percent = (self.rules.raise_factor - 1.0) * 100.0;
                self.notifier
                    .notify(NotificationEvent::new(
                        &test.id,
                        NotificationKind::BidRaised,
                        Severity::Warning,
                        format!(
                            "Only {} impressions after {:.1}h; raised max CPC by {:.0}% on {} variant(s)",
                            impressions,
                            hours,
                            percent,
                            outcome.raised.len()
                        ),
                        now_ms,
                    ))
                    .await;
            }
        }

        if self.is_dead(test, variants, now_ms) {
            outcome.dead_test_alert = true;
            tracing::error!(
                test_id = %test.id,
                hours_running = hours,
                "Test has no clicks, manual review recommended"
            );
            self.notifier
                .notify(NotificationEvent::new(
                    &test.id,
                    NotificationKind::DeadTest,
                    Severity::Critical,
                    format!(
                        "No clicks after {:.1}h; review the creatives or pause the test",
                        hours
                    ),
                    now_ms,
                ))
                .await;
        }

        outcome
    }

    /// Persists one raised bid. Failures are logged and the variant skipped.
    fn raise_bid(&self, test: &AbTest, variant: &Variant, now_ms: i64) -> Option<BidAdjustmentEvent> {
        let Some(old_bid) = variant.bid.max_cpc else {
            tracing::warn!(
                test_id = %test.id,
                variant_id = %variant.id,
                "Variant has no max CPC configured, skipping bid raise"
            );
            return None;
        };
        let new_bid = old_bid * self.rules.raise_factor;

        if let Err(e) = self.store.update_variant_bid_config(&variant.id, new_bid) {
            tracing::error!(
                test_id = %test.id,
                variant_id = %variant.id,
                error = %e,
                "Failed to persist raised bid"
            );
            return None;
        }

        let event = BidAdjustmentEvent {
            test_id: test.id.clone(),
            variant_id: variant.id.clone(),
            old_bid,
            new_bid,
            reason: BidAdjustmentReason::UnderExposure,
            timestamp: now_ms,
        };
        if let Err(e) = self.store.record_bid_adjustment(&event) {
            tracing::warn!(
                test_id = %test.id,
                variant_id = %variant.id,
                error = %e,
                "Bid raised but adjustment event not recorded"
            );
        }
        tracing::info!(
            test_id = %test.id,
            variant_id = %variant.id,
            campaign_ref = %variant.external_campaign_ref,
            old_bid,
            new_bid,
            "Raised max CPC"
        );
        Some(event)
    }
}
