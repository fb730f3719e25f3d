//! Concluding a test: pause the losers, move the whole budget to the winner,
//! mark the test completed.
//!
//! The steps are not transactional. Each external mutation is retried on its
//! own and a failed step is logged and reported, never rolled back. Only the
//! final status write aborts the rollout, since without it the test would be
//! picked up again next cycle.

use std::sync::Arc;

use serde::Serialize;

use super::config::{AbTest, CampaignStatus, StoreError, TestStatus, Variant};
use super::store::TestStore;
use crate::ads::{AdsPlatform, BudgetType};
use crate::notify::{NotificationEvent, NotificationKind, Notifier, Severity};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    pub variant_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutReport {
    pub test_id: String,
    pub winner_variant_id: String,
    pub confidence: Option<f64>,
    pub paused: Vec<String>,
    pub pause_failures: Vec<StepFailure>,
    pub total_budget: f64,
    pub budget_updated: bool,
    pub budget_error: Option<String>,
    pub creative_selected: bool,
}

impl RolloutReport {
    /// True when every external and local step succeeded.
    pub fn is_clean(&self) -> bool {
        self.pause_failures.is_empty() && self.budget_updated && self.budget_error.is_none()
    }
}

pub struct RolloutController {
    ads: Arc<dyn AdsPlatform>,
    store: Arc<dyn TestStore>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl RolloutController {
    pub fn new(
        ads: Arc<dyn AdsPlatform>,
        store: Arc<dyn TestStore>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ads,
            store,
            notifier,
            retry,
        }
    }

    pub async fn conclude(
        &self,
        test: &AbTest,
        winner_variant_id: &str,
        confidence: Option<f64>,
        now_ms: i64,
    ) -> Result<RolloutReport, StoreError> {
        if test.status == TestStatus::Completed {
            return Err(StoreError::InvalidStatus("completed".to_string()));
        }
        let winner = test
            .variant(winner_variant_id)
            .ok_or_else(|| StoreError::NotFound(winner_variant_id.to_string()))?;

        tracing::info!(
            test_id = %test.id,
            winner_variant_id,
            confidence = ?confidence,
            "Rolling out winner"
        );

        let mut report = RolloutReport {
            test_id: test.id.clone(),
            winner_variant_id: winner_variant_id.to_string(),
            confidence,
            paused: Vec::new(),
            pause_failures: Vec::new(),
            total_budget: test.total_budget(),
            budget_updated: false,
            budget_error: None,
            creative_selected: false,
        };

        for loser in test.variants.iter().filter(|v| v.id != winner.id) {
            match self.pause_loser(test, loser).await {
                Ok(()) => report.paused.push(loser.id.clone()),
                Err(error) => report.pause_failures.push(StepFailure {
                    variant_id: loser.id.clone(),
                    error,
                }),
            }
        }

        self.reallocate_budget(test, winner, &mut report).await;

        self.store.update_test_status(
            &test.id,
            TestStatus::Completed,
            Some(winner_variant_id),
            confidence,
            now_ms,
        )?;

        if let Some(creative_id) = winner.creative_id.as_deref() {
            match self.store.mark_creative_selected(creative_id) {
                Ok(()) => report.creative_selected = true,
                Err(e) => tracing::error!(
                    test_id = %test.id,
                    creative_id,
                    error = %e,
                    "Failed to mark winning creative selected"
                ),
            }
        }

        let message = match confidence {
            Some(c) => format!(
                "Test '{}' completed: {} won with {:.1}% confidence",
                test.name,
                winner.name,
                c * 100.0
            ),
            None => format!("Test '{}' completed: {} declared winner", test.name, winner.name),
        };
        self.notifier
            .notify(NotificationEvent::new(
                &test.id,
                NotificationKind::TestConcluded,
                if report.is_clean() {
                    Severity::Info
                } else {
                    Severity::Warning
                },
                message,
                now_ms,
            ))
            .await;

        tracing::info!(
            test_id = %test.id,
            paused = report.paused.len(),
            pause_failures = report.pause_failures.len(),
            budget_updated = report.budget_updated,
            "Rollout finished"
        );
        Ok(report)
    }

    async fn pause_loser(&self, test: &AbTest, loser: &Variant) -> Result<(), String> {
        let ads = Arc::clone(&self.ads);
        let result = self
            .retry
            .run("pause_campaign", || {
                let ads = Arc::clone(&ads);
                let account = loser.account_ref.clone();
                let campaign = loser.external_campaign_ref.clone();
                async move { ads.pause_campaign(&account, &campaign).await }
            })
            .await;

        if let Err(e) = result {
            tracing::error!(
                test_id = %test.id,
                variant_id = %loser.id,
                campaign_ref = %loser.external_campaign_ref,
                error = %e,
                "Failed to pause losing campaign"
            );
            return Err(e.to_string());
        }

        if let Err(e) = self
            .store
            .update_campaign_status(&loser.campaign_id, CampaignStatus::Paused)
        {
            tracing::error!(
                test_id = %test.id,
                variant_id = %loser.id,
                error = %e,
                "Campaign paused remotely but local status not updated"
            );
            return Err(e.to_string());
        }

        tracing::info!(
            test_id = %test.id,
            variant_id = %loser.id,
            campaign_ref = %loser.external_campaign_ref,
            "Paused losing campaign"
        );
        Ok(())
    }

    async fn reallocate_budget(&self, test: &AbTest, winner: &Variant, report: &mut RolloutReport) {
        let total = report.total_budget;
        let ads = Arc::clone(&self.ads);
        let result = self
            .retry
            .run("update_campaign_budget", || {
                let ads = Arc::clone(&ads);
                let account = winner.account_ref.clone();
                let campaign = winner.external_campaign_ref.clone();
                async move {
                    ads.update_campaign_budget(&account, &campaign, total, BudgetType::Daily)
                        .await
                }
            })
            .await;

        let local_amount = match result {
            Ok(()) => {
                report.budget_updated = true;
                tracing::info!(
                    test_id = %test.id,
                    variant_id = %winner.id,
                    total_budget = total,
                    "Moved full daily budget to winner"
                );
                total
            }
            Err(e) => {
                tracing::error!(
                    test_id = %test.id,
                    variant_id = %winner.id,
                    error = %e,
                    "Failed to update winner budget"
                );
                report.budget_error = Some(e.to_string());
                winner.budget_amount
            }
        };

        if let Err(e) = self
            .store
            .update_campaign_budget_local(&winner.campaign_id, local_amount, 1.0)
        {
            tracing::error!(
                test_id = %test.id,
                variant_id = %winner.id,
                error = %e,
                "Failed to record winner allocation locally"
            );
            if report.budget_error.is_none() {
                report.budget_error = Some(e.to_string());
            }
        }
    }
}
