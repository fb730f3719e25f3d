//! The scheduled batch pass over every auto-monitored running test.
//!
//! Tests are processed one after another. Each one runs inside its own
//! error boundary and under a processing lease, so a failure or an
//! overlapping invocation never affects the others.

use std::sync::Arc;

use serde::Serialize;

use super::bidding::AdaptiveBidController;
use super::config::TestStatus;
use super::metrics::MetricsAggregator;
use super::rollout::{RolloutController, RolloutReport};
use super::significance::{SignificanceEngine, SignificanceResult};
use super::store::TestStore;
use crate::ads::AdsPlatform;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::notify::Notifier;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub seen: usize,
    pub processed: usize,
    pub concluded: usize,
    pub skipped_leased: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub enum TestOutcome {
    /// Another owner holds an unexpired lease.
    Leased,
    /// No longer running, manual-only, or too few variants to compare.
    Skipped(&'static str),
    Evaluated(Box<SignificanceResult>),
    Concluded(Box<RolloutReport>),
}

pub struct TestMonitor {
    store: Arc<dyn TestStore>,
    aggregator: MetricsAggregator,
    bidder: AdaptiveBidController,
    engine: SignificanceEngine,
    rollout: RolloutController,
    owner: String,
    lease_ttl_ms: i64,
}

fn default_owner() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}-{}", host, uuid::Uuid::new_v4())
}

impl TestMonitor {
    pub fn new(
        store: Arc<dyn TestStore>,
        ads: Arc<dyn AdsPlatform>,
        notifier: Arc<dyn Notifier>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            aggregator: MetricsAggregator::new(Arc::clone(&store)),
            bidder: AdaptiveBidController::new(
                config.bid_rules.clone(),
                Arc::clone(&store),
                Arc::clone(&notifier),
            ),
            engine: SignificanceEngine::new(config.min_cpc_improvement),
            rollout: RolloutController::new(
                ads,
                Arc::clone(&store),
                notifier,
                config.retry.clone(),
            ),
            store,
            owner: default_owner(),
            lease_ttl_ms: config.lease_ttl_ms(),
        }
    }

    /// Overrides the lease owner id (hostname plus a random suffix by default).
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn run_cycle(&self) -> CycleSummary {
        self.run_cycle_at(chrono::Utc::now().timestamp_millis())
            .await
    }

    /// One full pass. Never fails as a whole: listing errors end the cycle
    /// early and per-test errors are counted in `failed`.
    pub async fn run_cycle_at(&self, now_ms: i64) -> CycleSummary {
        let mut summary = CycleSummary::default();

        let tests = match self.store.list_monitored_tests() {
            Ok(tests) => tests,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list monitored tests");
                return summary;
            }
        };
        summary.seen = tests.len();
        tracing::info!(count = tests.len(), owner = %self.owner, "Monitor cycle started");

        for test in &tests {
            match self.process_test(&test.id, now_ms).await {
                Ok(TestOutcome::Leased) => summary.skipped_leased += 1,
                Ok(TestOutcome::Skipped(reason)) => {
                    tracing::debug!(test_id = %test.id, reason, "Test skipped");
                }
                Ok(TestOutcome::Evaluated(_)) => summary.processed += 1,
                Ok(TestOutcome::Concluded(_)) => {
                    summary.processed += 1;
                    summary.concluded += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        test_id = %test.id,
                        error = %e,
                        transient = e.is_transient(),
                        "Test processing failed"
                    );
                }
            }
        }

        tracing::info!(
            seen = summary.seen,
            processed = summary.processed,
            concluded = summary.concluded,
            skipped_leased = summary.skipped_leased,
            failed = summary.failed,
            "Monitor cycle finished"
        );
        summary
    }

    /// Processes one test under its lease. The lease is released on every
    /// path once acquired.
    pub async fn process_test(&self, test_id: &str, now_ms: i64) -> Result<TestOutcome> {
        if !self
            .store
            .acquire_lease(test_id, &self.owner, now_ms, self.lease_ttl_ms)?
        {
            tracing::info!(test_id, "Test leased by another monitor, skipping");
            return Ok(TestOutcome::Leased);
        }

        let outcome = self.process_leased(test_id, now_ms).await;

        if let Err(e) = self.store.release_lease(test_id, &self.owner) {
            tracing::warn!(test_id, error = %e, "Failed to release processing lease");
        }
        outcome
    }

    async fn process_leased(&self, test_id: &str, now_ms: i64) -> Result<TestOutcome> {
        // Re-read under the lease; the listed copy may already be stale.
        let test = self.store.get_test(test_id)?;
        if test.status != TestStatus::Running {
            return Ok(TestOutcome::Skipped("not running"));
        }
        if !test.auto_monitor {
            return Ok(TestOutcome::Skipped("auto-monitor disabled"));
        }
        if test.variants.len() < 2 {
            tracing::warn!(test_id, variants = test.variants.len(), "Too few variants to compare");
            return Ok(TestOutcome::Skipped("fewer than two variants"));
        }

        let variants = self.aggregator.aggregate(&test, now_ms)?;
        let bids = self.bidder.evaluate(&test, &variants, now_ms).await;
        if !bids.raised.is_empty() || bids.dead_test_alert {
            tracing::debug!(
                test_id,
                raised = bids.raised.len(),
                dead_test_alert = bids.dead_test_alert,
                "Bid rules applied"
            );
        }

        let result = self.engine.evaluate(&test, &variants);
        tracing::info!(
            test_id,
            dimension = ?result.dimension,
            statistic = result.statistic,
            p_value = ?result.p_value,
            significant = result.is_significant,
            has_winner = result.has_winner,
            total_sample_size = result.total_sample_size,
            "Significance evaluated"
        );

        match result.winner_variant_id.clone() {
            Some(winner) if result.should_roll_out() => {
                let report = self
                    .rollout
                    .conclude(&test, &winner, Some(result.confidence()), now_ms)
                    .await?;
                Ok(TestOutcome::Concluded(Box::new(report)))
            }
            _ => Ok(TestOutcome::Evaluated(Box::new(result))),
        }
    }

    /// Concludes a test with an operator-chosen winner and no statistical
    /// confidence. Runs under the same lease as the scheduled path.
    pub async fn conclude_manually(
        &self,
        test_id: &str,
        winner_variant_id: &str,
        now_ms: i64,
    ) -> Result<Option<RolloutReport>> {
        if !self
            .store
            .acquire_lease(test_id, &self.owner, now_ms, self.lease_ttl_ms)?
        {
            return Ok(None);
        }
        let result = self
            .conclude_leased(test_id, winner_variant_id, now_ms)
            .await
            .map(Some);

        if let Err(e) = self.store.release_lease(test_id, &self.owner) {
            tracing::warn!(test_id, error = %e, "Failed to release processing lease");
        }
        result
    }

    async fn conclude_leased(
        &self,
        test_id: &str,
        winner_variant_id: &str,
        now_ms: i64,
    ) -> Result<RolloutReport> {
        let test = self.store.get_test(test_id)?;
        Ok(self
            .rollout
            .conclude(&test, winner_variant_id, None, now_ms)
            .await?)
    }
}
