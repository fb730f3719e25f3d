//! Read-only status report for one test: sample progress, the current
//! leader and operator warnings. Computed from the aggregates persisted by
//! the last monitor cycle; nothing here mutates the store.

use serde::Serialize;

use super::bidding::BidRules;
use super::config::{AbTest, CampaignStatus, TestDimension, TestStatus, Variant, VariantMetrics};

const MS_PER_HOUR: f64 = 3_600_000.0;
const TIME_RUNNING_OUT_HOURS: f64 = 24.0;
const SIMILAR_CTR_FRACTION: f64 = 0.05;
const SIMILAR_MIN_SAMPLE_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProgress {
    pub test_id: String,
    pub name: String,
    pub dimension: TestDimension,
    pub status: TestStatus,
    pub total_samples: u64,
    pub min_samples_required: u64,
    pub completion_percentage: f64,
    pub hours_running: f64,
    pub estimated_completion_at: Option<i64>,
    pub winner_variant_id: Option<String>,
    pub statistical_confidence: Option<f64>,
    pub current_leader: Option<Leader>,
    pub variants: Vec<VariantStatus>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leader {
    pub variant_id: String,
    pub name: String,
    /// CTR for creative tests, CPC for strategy tests.
    pub metric: f64,
    /// Relative advantage over the runner-up, in percent. Positive means
    /// better: higher CTR or lower CPC.
    pub improvement_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantStatus {
    pub variant_id: String,
    pub name: String,
    pub campaign_ref: String,
    pub campaign_status: CampaignStatus,
    pub traffic_allocation: f64,
    pub max_cpc: Option<f64>,
    pub metrics: VariantMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningKind {
    LowTraffic,
    NoClicks,
    TimeRunningOut,
    SimilarPerformance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub kind: WarningKind,
    pub severity: WarningSeverity,
    pub message: String,
}

pub fn progress_report(test: &AbTest, rules: &BidRules, now_ms: i64) -> TestProgress {
    let total_samples = test.total_clicks();
    let hours_running = test.hours_running(now_ms);
    let completion_percentage = if test.min_sample_size == 0 {
        100.0
    } else {
        (total_samples as f64 / test.min_sample_size as f64 * 100.0).min(100.0)
    };

    TestProgress {
        test_id: test.id.clone(),
        name: test.name.clone(),
        dimension: test.dimension,
        status: test.status,
        total_samples,
        min_samples_required: test.min_sample_size,
        completion_percentage,
        hours_running,
        estimated_completion_at: estimate_completion(test, total_samples, now_ms),
        winner_variant_id: test.winner_variant_id.clone(),
        statistical_confidence: test.statistical_confidence,
        current_leader: current_leader(test),
        variants: test
            .variants
            .iter()
            .map(|v| VariantStatus {
                variant_id: v.id.clone(),
                name: v.name.clone(),
                campaign_ref: v.external_campaign_ref.clone(),
                campaign_status: v.campaign_status,
                traffic_allocation: v.traffic_allocation,
                max_cpc: v.bid.max_cpc,
                metrics: v.metrics.clone(),
            })
            .collect(),
        warnings: warnings(test, rules, hours_running, now_ms),
    }
}

/// Linear extrapolation of the sample rate so far.
fn estimate_completion(test: &AbTest, total_samples: u64, now_ms: i64) -> Option<i64> {
    let elapsed_ms = now_ms - test.started_at;
    if test.status != TestStatus::Running
        || total_samples == 0
        || total_samples >= test.min_sample_size
        || elapsed_ms <= 0
    {
        return None;
    }
    let per_ms = total_samples as f64 / elapsed_ms as f64;
    let remaining = (test.min_sample_size - total_samples) as f64;
    let remaining_ms = (remaining / per_ms).round();
    // Rates too slow to land inside the timestamp range have no estimate.
    if !remaining_ms.is_finite() || remaining_ms >= i64::MAX as f64 {
        return None;
    }
    now_ms.checked_add(remaining_ms as i64)
}

fn current_leader(test: &AbTest) -> Option<Leader> {
    match test.dimension {
        TestDimension::Creative => {
            let mut ranked: Vec<&Variant> = test.variants.iter().collect();
            ranked.sort_by(|a, b| b.metrics.ctr.total_cmp(&a.metrics.ctr));
            let best = ranked.first()?;
            let improvement_percent = match ranked.get(1) {
                Some(runner_up) if runner_up.metrics.ctr > 0.0 => {
                    (best.metrics.ctr - runner_up.metrics.ctr) / runner_up.metrics.ctr * 100.0
                }
                _ => 0.0,
            };
            Some(Leader {
                variant_id: best.id.clone(),
                name: best.name.clone(),
                metric: best.metrics.ctr,
                improvement_percent,
            })
        }
        TestDimension::Strategy => {
            let mut ranked: Vec<&Variant> =
                test.variants.iter().filter(|v| v.metrics.clicks > 0).collect();
            ranked.sort_by(|a, b| a.metrics.cpc.total_cmp(&b.metrics.cpc));
            let best = ranked.first()?;
            let improvement_percent = match ranked.get(1) {
                Some(runner_up) if runner_up.metrics.cpc > 0.0 => {
                    (runner_up.metrics.cpc - best.metrics.cpc) / runner_up.metrics.cpc * 100.0
                }
                _ => 0.0,
            };
            Some(Leader {
                variant_id: best.id.clone(),
                name: best.name.clone(),
                metric: best.metrics.cpc,
                improvement_percent,
            })
        }
    }
}

fn warnings(test: &AbTest, rules: &BidRules, hours_running: f64, now_ms: i64) -> Vec<Warning> {
    let mut out = Vec::new();
    let impressions = test.total_impressions();
    let clicks = test.total_clicks();

    if hours_running >= rules.under_exposure_after_hours
        && (impressions as f64) < test.min_sample_size as f64 * rules.min_exposure_fraction
    {
        out.push(Warning {
            kind: WarningKind::LowTraffic,
            severity: WarningSeverity::High,
            message: format!(
                "Running {:.0}h with only {} impressions; max CPC may be too low",
                hours_running, impressions
            ),
        });
    }

    if hours_running >= rules.dead_test_after_hours && clicks == 0 {
        out.push(Warning {
            kind: WarningKind::NoClicks,
            severity: WarningSeverity::Critical,
            message: format!(
                "Running {:.0}h without a single click; review the creatives",
                hours_running
            ),
        });
    }

    if let Some(ends_at) = test.ends_at {
        let hours_left = (ends_at - now_ms) as f64 / MS_PER_HOUR;
        if hours_left > 0.0 && hours_left < TIME_RUNNING_OUT_HOURS && clicks < test.min_sample_size
        {
            out.push(Warning {
                kind: WarningKind::TimeRunningOut,
                severity: WarningSeverity::Medium,
                message: format!(
                    "Test ends in {:.0}h but the sample size is not reached",
                    hours_left
                ),
            });
        }
    }

    if test.variants.len() >= 2 {
        let mut ctrs: Vec<f64> = test.variants.iter().map(|v| v.metrics.ctr).collect();
        ctrs.sort_by(|a, b| b.total_cmp(a));
        let (first, second) = (ctrs[0], ctrs[1]);
        if first > 0.0
            && second > 0.0
            && (first - second).abs() / first < SIMILAR_CTR_FRACTION
            && clicks as f64 >= test.min_sample_size as f64 * SIMILAR_MIN_SAMPLE_FRACTION
        {
            out.push(Warning {
                kind: WarningKind::SimilarPerformance,
                severity: WarningSeverity::Low,
                message: "Top variants differ by less than 5%; more samples may be needed"
                    .to_string(),
            });
        }
    }

    out
}
