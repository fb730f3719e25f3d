//! Ads-platform mutations issued by the rollout.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetType {
    Daily,
    Total,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdsError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by ads platform")]
    RateLimited,

    #[error("ads platform returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("circuit open: ads platform marked unavailable")]
    CircuitOpen,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AdsError {
    /// Network failures, timeouts, rate limits and 5xx responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            AdsError::Timeout(_) | AdsError::Transport(_) | AdsError::RateLimited => true,
            AdsError::Api { status, .. } => *status >= 500,
            AdsError::CircuitOpen | AdsError::InvalidResponse(_) => false,
        }
    }
}

#[async_trait]
pub trait AdsPlatform: Send + Sync {
    async fn pause_campaign(&self, account_ref: &str, campaign_ref: &str) -> Result<(), AdsError>;

    async fn update_campaign_budget(
        &self,
        account_ref: &str,
        campaign_ref: &str,
        amount: f64,
        budget_type: BudgetType,
    ) -> Result<(), AdsError>;
}

/// Accepts every mutation without contacting a platform. Used for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunAds;

#[async_trait]
impl AdsPlatform for DryRunAds {
    async fn pause_campaign(&self, account_ref: &str, campaign_ref: &str) -> Result<(), AdsError> {
        tracing::info!(account_ref, campaign_ref, "[dry-run] pause campaign");
        Ok(())
    }

    async fn update_campaign_budget(
        &self,
        account_ref: &str,
        campaign_ref: &str,
        amount: f64,
        budget_type: BudgetType,
    ) -> Result<(), AdsError> {
        tracing::info!(
            account_ref,
            campaign_ref,
            amount,
            budget_type = ?budget_type,
            "[dry-run] update campaign budget"
        );
        Ok(())
    }
}
