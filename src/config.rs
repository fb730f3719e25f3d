use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::experiments::bidding::BidRules;
use crate::experiments::significance::DEFAULT_MIN_CPC_IMPROVEMENT;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Scheduler cadence; the lease TTL must outlive one cycle.
    pub interval_secs: u64,
    pub lease_ttl_secs: u64,
    pub min_cpc_improvement: f64,
    pub bid_rules: BidRules,
    pub retry: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            lease_ttl_secs: 7200,
            min_cpc_improvement: DEFAULT_MIN_CPC_IMPROVEMENT,
            bid_rules: BidRules::default(),
            retry: RetryPolicy::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}

impl MonitorConfig {
    /// Load from {data_dir}/monitor.json, falling back to defaults with
    /// ABPILOT_* environment overrides.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let path = data_dir.join("monitor.json");

        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<MonitorConfig>(&content) {
                    Ok(config) => {
                        tracing::info!(
                            "Loaded monitor config: interval={}s, lease_ttl={}s",
                            config.interval_secs,
                            config.lease_ttl_secs
                        );
                        return config.normalized();
                    }
                    Err(e) => {
                        tracing::error!("Failed to parse monitor.json: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to read monitor.json: {}, using defaults", e);
                }
            }
        }

        let mut config = MonitorConfig::default();
        if let Some(v) = env_parse("ABPILOT_MONITOR_INTERVAL_SECS") {
            config.interval_secs = v;
        }
        if let Some(v) = env_parse("ABPILOT_LEASE_TTL_SECS") {
            config.lease_ttl_secs = v;
        }
        if let Some(v) = env_parse("ABPILOT_MIN_CPC_IMPROVEMENT") {
            config.min_cpc_improvement = v;
        }
        if let Some(v) = env_parse("ABPILOT_BID_RAISE_FACTOR") {
            config.bid_rules.raise_factor = v;
        }
        if let Some(v) = env_parse("ABPILOT_MAX_RETRIES") {
            config.retry.max_retries = v;
        }
        if let Some(v) = env_parse("ABPILOT_CALL_TIMEOUT_MS") {
            config.retry.timeout_ms = v;
        }
        config.normalized()
    }

    /// Keeps the lease TTL strictly longer than one cycle.
    pub fn normalized(mut self) -> Self {
        if self.lease_ttl_secs <= self.interval_secs {
            let ttl = self.interval_secs.saturating_mul(2).max(1);
            tracing::warn!(
                "lease_ttl_secs={} does not outlive interval_secs={}, using {}",
                self.lease_ttl_secs,
                self.interval_secs,
                ttl
            );
            self.lease_ttl_secs = ttl;
        }
        self
    }

    /// Applies a command-line interval override, keeping the lease longer than it.
    pub fn with_interval_secs(mut self, interval_secs: u64) -> Self {
        self.interval_secs = interval_secs.max(1);
        self.normalized()
    }

    pub fn lease_ttl_ms(&self) -> i64 {
        (self.lease_ttl_secs as i64).saturating_mul(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            "ABPILOT_MONITOR_INTERVAL_SECS",
            "ABPILOT_LEASE_TTL_SECS",
            "ABPILOT_MIN_CPC_IMPROVEMENT",
            "ABPILOT_BID_RAISE_FACTOR",
            "ABPILOT_MAX_RETRIES",
            "ABPILOT_CALL_TIMEOUT_MS",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn defaults_without_file_or_env() {
        clear_env();
        let tmp = tempfile::tempdir().unwrap();
        let config = MonitorConfig::load_or_default(tmp.path());
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.bid_rules.raise_factor, 1.20);
        assert_eq!(config.min_cpc_improvement, 0.05);
    }

    #[test]
    #[serial]
    fn env_overrides_apply() {
        clear_env();
        std::env::set_var("ABPILOT_MONITOR_INTERVAL_SECS", "600");
        std::env::set_var("ABPILOT_BID_RAISE_FACTOR", "1.1");
        std::env::set_var("ABPILOT_MAX_RETRIES", "not-a-number");
        let tmp = tempfile::tempdir().unwrap();
        let config = MonitorConfig::load_or_default(tmp.path());
        clear_env();

        assert_eq!(config.interval_secs, 600);
        assert_eq!(config.bid_rules.raise_factor, 1.1);
        assert_eq!(config.retry.max_retries, RetryPolicy::default().max_retries);
    }

    #[test]
    #[serial]
    fn file_takes_precedence_and_fills_defaults() {
        clear_env();
        std::env::set_var("ABPILOT_MONITOR_INTERVAL_SECS", "5");
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("monitor.json"),
            r#"{"intervalSecs": 900, "bidRules": {"raiseFactor": 1.5}}"#,
        )
        .unwrap();
        let config = MonitorConfig::load_or_default(tmp.path());
        clear_env();

        assert_eq!(config.interval_secs, 900);
        assert_eq!(config.bid_rules.raise_factor, 1.5);
        assert_eq!(config.bid_rules.under_exposure_after_hours, 24.0);
        assert_eq!(config.lease_ttl_secs, 7200);
    }

    #[test]
    #[serial]
    fn malformed_file_falls_back_to_defaults() {
        clear_env();
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("monitor.json"), "{not json").unwrap();
        let config = MonitorConfig::load_or_default(tmp.path());
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn lease_ttl_is_bumped_past_interval() {
        let config = MonitorConfig {
            interval_secs: 3600,
            lease_ttl_secs: 60,
            ..MonitorConfig::default()
        }
        .normalized();
        assert_eq!(config.lease_ttl_secs, 7200);
        assert_eq!(config.lease_ttl_ms(), 7_200_000);
    }

    #[test]
    fn interval_override_extends_lease() {
        let config = MonitorConfig::default().with_interval_secs(4 * 3600);
        assert_eq!(config.interval_secs, 14_400);
        assert_eq!(config.lease_ttl_secs, 28_800);

        let short = MonitorConfig::default().with_interval_secs(0);
        assert_eq!(short.interval_secs, 1);
        assert_eq!(short.lease_ttl_secs, 7200);
    }
}
