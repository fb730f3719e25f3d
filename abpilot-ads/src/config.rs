use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdsClientConfig {
    /// e.g. "https://ads-gateway.internal:8443"
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

impl AdsClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout_secs: default_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Load from {data_dir}/ads.json, else from ABPILOT_ADS_* env vars.
    /// Returns None when no platform endpoint is configured at all.
    pub fn load(data_dir: &Path) -> Option<Self> {
        let ads_json = data_dir.join("ads.json");

        if ads_json.exists() {
            match std::fs::read_to_string(&ads_json) {
                Ok(content) => match serde_json::from_str::<AdsClientConfig>(&content) {
                    Ok(config) => {
                        tracing::info!("Loaded ads client config: base_url={}", config.base_url);
                        return Some(config);
                    }
                    Err(e) => {
                        tracing::error!("Failed to parse ads.json: {}, trying environment", e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to read ads.json: {}, trying environment", e);
                }
            }
        }

        Self::from_env()
    }

    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("ABPILOT_ADS_BASE_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())?;

        let mut config = Self::new(base_url);
        config.token = std::env::var("ABPILOT_ADS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        if let Some(secs) = std::env::var("ABPILOT_ADS_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            config.timeout_secs = secs;
        }
        tracing::info!(
            "Ads client configured from environment: base_url={}",
            config.base_url
        );
        Some(config)
    }
}
