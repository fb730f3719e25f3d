#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use abpilot::experiments::config::{
    AbTest, BidConfig, CampaignStatus, PerformanceRow, TestDimension, TestStatus, Variant,
    VariantMetrics,
};
use abpilot::notify::NotificationEvent;
use abpilot::{
    AdsError, AdsPlatform, BudgetType, JsonTestStore, MonitorConfig, Notifier, RetryPolicy,
    TestMonitor,
};
use async_trait::async_trait;
use tempfile::TempDir;

pub const HOUR: i64 = 3_600_000;
pub const NOW: i64 = 1_800_000_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum AdsCall {
    Pause {
        campaign: String,
        ok: bool,
    },
    Budget {
        campaign: String,
        amount: f64,
        budget_type: BudgetType,
        ok: bool,
    },
}

/// Failure script for one campaign: `None` remaining means fail forever.
struct Failure {
    remaining: Option<u32>,
    error: AdsError,
}

impl Failure {
    fn take(&mut self) -> Option<AdsError> {
        match &mut self.remaining {
            None => Some(self.error.clone()),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.error.clone())
            }
        }
    }
}

/// Ads platform double that records every attempt and fails on request.
#[derive(Default)]
pub struct FakeAds {
    calls: Mutex<Vec<AdsCall>>,
    pause_failures: Mutex<HashMap<String, Failure>>,
    budget_failures: Mutex<HashMap<String, Failure>>,
}

impl FakeAds {
    pub fn fail_pause(&self, campaign: &str, error: AdsError) {
        self.pause_failures.lock().unwrap().insert(
            campaign.to_string(),
            Failure {
                remaining: None,
                error,
            },
        );
    }

    pub fn fail_pause_times(&self, campaign: &str, times: u32, error: AdsError) {
        self.pause_failures.lock().unwrap().insert(
            campaign.to_string(),
            Failure {
                remaining: Some(times),
                error,
            },
        );
    }

    pub fn fail_budget(&self, campaign: &str, error: AdsError) {
        self.budget_failures.lock().unwrap().insert(
            campaign.to_string(),
            Failure {
                remaining: None,
                error,
            },
        );
    }

    pub fn calls(&self) -> Vec<AdsCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn paused_campaigns(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                AdsCall::Pause { campaign, ok: true } => Some(campaign),
                _ => None,
            })
            .collect()
    }

    pub fn pause_attempts(&self, campaign_ref: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AdsCall::Pause { campaign, .. } if campaign == campaign_ref))
            .count()
    }

    pub fn budget_updates(&self) -> Vec<(String, f64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                AdsCall::Budget {
                    campaign,
                    amount,
                    ok: true,
                    ..
                } => Some((campaign, amount)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl AdsPlatform for FakeAds {
    async fn pause_campaign(&self, _account_ref: &str, campaign_ref: &str) -> Result<(), AdsError> {
        let failure = self
            .pause_failures
            .lock()
            .unwrap()
            .get_mut(campaign_ref)
            .and_then(Failure::take);
        self.calls.lock().unwrap().push(AdsCall::Pause {
            campaign: campaign_ref.to_string(),
            ok: failure.is_none(),
        });
        failure.map_or(Ok(()), Err)
    }

    async fn update_campaign_budget(
        &self,
        _account_ref: &str,
        campaign_ref: &str,
        amount: f64,
        budget_type: BudgetType,
    ) -> Result<(), AdsError> {
        let failure = self
            .budget_failures
            .lock()
            .unwrap()
            .get_mut(campaign_ref)
            .and_then(Failure::take);
        self.calls.lock().unwrap().push(AdsCall::Budget {
            campaign: campaign_ref.to_string(),
            amount,
            budget_type,
            ok: failure.is_none(),
        });
        failure.map_or(Ok(()), Err)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: NotificationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn variant(id: &str, budget: f64, max_cpc: Option<f64>, allocation: f64) -> Variant {
    Variant {
        id: id.to_string(),
        name: format!("Variant {}", id.to_uppercase()),
        campaign_id: format!("camp-{}", id),
        external_campaign_ref: format!("g-{}", id),
        account_ref: "acct-1".to_string(),
        creative_id: Some(format!("cr-{}", id)),
        traffic_allocation: allocation,
        budget_amount: budget,
        campaign_status: CampaignStatus::Enabled,
        bid: BidConfig { max_cpc },
        metrics: VariantMetrics::default(),
    }
}

/// Two-arm test with $50 per arm and a $1.00 max CPC, started `hours_ago`.
pub fn two_arm_test(
    id: &str,
    dimension: TestDimension,
    min_sample_size: u64,
    hours_ago: i64,
    arms: (&str, &str),
) -> AbTest {
    AbTest {
        id: id.to_string(),
        name: format!("Test {}", id),
        dimension,
        status: TestStatus::Running,
        auto_monitor: true,
        min_sample_size,
        confidence_level: 0.95,
        started_at: NOW - hours_ago * HOUR,
        ends_at: None,
        winner_variant_id: None,
        statistical_confidence: None,
        completed_at: None,
        processing_lease_until: None,
        lease_owner: None,
        variants: vec![
            variant(arms.0, 50.0, Some(1.0), 0.5),
            variant(arms.1, 50.0, Some(1.0), 0.5),
        ],
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub store: Arc<JsonTestStore>,
    pub ads: Arc<FakeAds>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: MonitorConfig,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(JsonTestStore::new(tmp.path()).unwrap());
        let config = MonitorConfig {
            retry: RetryPolicy::none(),
            ..MonitorConfig::default()
        };
        Self {
            tmp,
            store,
            ads: Arc::new(FakeAds::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            config,
        }
    }

    pub fn monitor(&self, owner: &str) -> TestMonitor {
        TestMonitor::new(
            self.store.clone(),
            self.ads.clone(),
            self.notifier.clone(),
            &self.config,
        )
        .with_owner(owner)
    }

    pub fn add_test(&self, test: AbTest) {
        self.store.create(test).unwrap();
    }

    /// One upstream performance row for `g-{variant}`.
    pub fn perf(&self, variant: &str, impressions: u64, clicks: u64, cost: f64) {
        self.store
            .append_performance(&PerformanceRow {
                campaign_ref: format!("g-{}", variant),
                date: "2026-10-01".to_string(),
                impressions,
                clicks,
                conversions: 0,
                cost,
            })
            .unwrap();
    }
}
