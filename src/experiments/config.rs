use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Allowed drift when checking that traffic allocations sum to one.
pub const ALLOCATION_EPSILON: f64 = 1e-6;

const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AbTest {
    pub id: String,
    pub name: String,
    pub dimension: TestDimension,
    pub status: TestStatus,
    /// Only tests with this flag are picked up by the scheduled monitor.
    #[serde(default = "default_auto_monitor")]
    pub auto_monitor: bool,
    pub min_sample_size: u64,
    pub confidence_level: f64,
    pub started_at: i64,
    #[serde(default)]
    pub ends_at: Option<i64>,
    #[serde(default)]
    pub winner_variant_id: Option<String>,
    #[serde(default)]
    pub statistical_confidence: Option<f64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub processing_lease_until: Option<i64>,
    #[serde(default)]
    pub lease_owner: Option<String>,
    pub variants: Vec<Variant>,
}

fn default_auto_monitor() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestDimension {
    /// Compares ad creatives by click-through rate.
    Creative,
    /// Compares bidding strategies by cost per click.
    Strategy,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Running,
    Completed,
}

/// One arm of a test. Each variant owns exactly one external campaign.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub name: String,
    /// Local campaign row id.
    pub campaign_id: String,
    /// Campaign id on the ads platform.
    pub external_campaign_ref: String,
    pub account_ref: String,
    #[serde(default)]
    pub creative_id: Option<String>,
    pub traffic_allocation: f64,
    pub budget_amount: f64,
    #[serde(default)]
    pub campaign_status: CampaignStatus,
    #[serde(default)]
    pub bid: BidConfig,
    #[serde(default)]
    pub metrics: VariantMetrics,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    #[default]
    Enabled,
    Paused,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BidConfig {
    pub max_cpc: Option<f64>,
}

/// Aggregated counters and derived ratios for one variant.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantMetrics {
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub cost: f64,
    pub ctr: f64,
    pub conversion_rate: f64,
    pub cpc: f64,
    pub cpa: f64,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// One raw performance row as written by the upstream sync process.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRow {
    pub campaign_ref: String,
    pub date: String,
    pub impressions: u64,
    pub clicks: u64,
    #[serde(default)]
    pub conversions: u64,
    pub cost: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceTotals {
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub cost: f64,
}

impl PerformanceTotals {
    pub fn add(&mut self, row: &PerformanceRow) {
        self.impressions += row.impressions;
        self.clicks += row.clicks;
        self.conversions += row.conversions;
        self.cost += row.cost;
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BidAdjustmentReason {
    UnderExposure,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BidAdjustmentEvent {
    pub test_id: String,
    pub variant_id: String,
    pub old_bid: f64,
    pub new_bid: f64,
    pub reason: BidAdjustmentReason,
    pub timestamp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("test not found: {0}")]
    NotFound(String),
    #[error("test already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid status transition: test is {0}")]
    InvalidStatus(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AbTest {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.variants.len() < 2 {
            return Err(StoreError::InvalidConfig(
                "a test needs at least two variants".to_string(),
            ));
        }
        if self.confidence_level <= 0.0 || self.confidence_level >= 1.0 {
            return Err(StoreError::InvalidConfig(
                "confidenceLevel must be in (0.0, 1.0) exclusive".to_string(),
            ));
        }
        if self.min_sample_size == 0 {
            return Err(StoreError::InvalidConfig(
                "minSampleSize must be positive".to_string(),
            ));
        }

        let mut variant_ids = HashSet::new();
        let mut campaign_refs = HashSet::new();
        for v in &self.variants {
            if !(0.0..=1.0).contains(&v.traffic_allocation) {
                return Err(StoreError::InvalidConfig(format!(
                    "variant '{}' trafficAllocation must be in [0.0, 1.0]",
                    v.id
                )));
            }
            if !variant_ids.insert(v.id.as_str()) {
                return Err(StoreError::InvalidConfig(format!(
                    "duplicate variant id '{}'",
                    v.id
                )));
            }
            if !campaign_refs.insert(v.external_campaign_ref.as_str()) {
                return Err(StoreError::InvalidConfig(format!(
                    "duplicate externalCampaignRef '{}'",
                    v.external_campaign_ref
                )));
            }
        }

        if self.status == TestStatus::Running {
            let total: f64 = self.variants.iter().map(|v| v.traffic_allocation).sum();
            if (total - 1.0).abs() > ALLOCATION_EPSILON {
                return Err(StoreError::InvalidConfig(format!(
                    "trafficAllocation of a running test must sum to 1.0, got {}",
                    total
                )));
            }
        }
        Ok(())
    }

    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    pub fn variant_by_campaign(&self, campaign_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.campaign_id == campaign_id)
    }

    pub fn total_budget(&self) -> f64 {
        self.variants.iter().map(|v| v.budget_amount).sum()
    }

    pub fn total_impressions(&self) -> u64 {
        self.variants.iter().map(|v| v.metrics.impressions).sum()
    }

    pub fn total_clicks(&self) -> u64 {
        self.variants.iter().map(|v| v.metrics.clicks).sum()
    }

    /// Hours since the test started, never negative.
    pub fn hours_running(&self, now_ms: i64) -> f64 {
        (now_ms.saturating_sub(self.started_at) as f64 / MS_PER_HOUR).max(0.0)
    }

    pub fn is_lease_held(&self, now_ms: i64) -> bool {
        self.processing_lease_until
            .is_some_and(|until| until > now_ms && self.lease_owner.is_some())
    }
}
