use std::time::Duration;

use abpilot::{AdsError, AdsPlatform, BudgetType};
use async_trait::async_trait;
use serde::Serialize;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::AdsClientConfig;
use crate::types::{ApiErrorBody, CampaignBudgetRequest, CampaignStatusRequest};

/// HTTP client for the ads-platform gateway.
pub struct HttpAdsClient {
    base_url: reqwest::Url,
    token: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
}

impl HttpAdsClient {
    pub fn new(config: &AdsClientConfig) -> Result<Self, AdsError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AdsError::Transport(format!("failed to build HTTP client: {e}")))?;

        let base_url = reqwest::Url::parse(&config.base_url)
            .map_err(|e| AdsError::Transport(format!("invalid base url {}: {e}", config.base_url)))?;

        Ok(Self {
            base_url,
            token: config.token.clone(),
            timeout: config.timeout(),
            http_client,
            circuit_breaker: CircuitBreaker::new(config.failure_threshold, config.cooldown()),
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Refs are pushed as path segments so they are percent-encoded.
    fn campaign_url(
        &self,
        account_ref: &str,
        campaign_ref: &str,
        action: &str,
    ) -> Result<reqwest::Url, AdsError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AdsError::Transport(format!("base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "accounts", account_ref, "campaigns", campaign_ref, action]);
        Ok(url)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: reqwest::Url,
        body: &B,
    ) -> Result<(), AdsError> {
        if !self.circuit_breaker.allow_request() {
            return Err(AdsError::CircuitOpen);
        }

        let mut request = self.http_client.post(url.clone()).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let result = match request.send().await {
            Ok(resp) => self.check_response(resp).await,
            Err(e) if e.is_timeout() => Err(AdsError::Timeout(self.timeout)),
            Err(e) => Err(AdsError::Transport(format!("request to {url} failed: {e}"))),
        };

        match &result {
            Ok(()) => self.circuit_breaker.record_success(),
            Err(e) if e.is_transient() => self.circuit_breaker.record_failure(),
            Err(_) => {}
        }
        result
    }

    async fn check_response(&self, resp: reqwest::Response) -> Result<(), AdsError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AdsError::RateLimited);
        }

        let body_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "failed to read response body".into());
        let message = serde_json::from_str::<ApiErrorBody>(&body_text)
            .ok()
            .and_then(ApiErrorBody::into_message)
            .unwrap_or(body_text);
        Err(AdsError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl AdsPlatform for HttpAdsClient {
    async fn pause_campaign(&self, account_ref: &str, campaign_ref: &str) -> Result<(), AdsError> {
        let url = self.campaign_url(account_ref, campaign_ref, "status")?;
        self.post(url, &CampaignStatusRequest::paused()).await?;
        tracing::debug!(account_ref, campaign_ref, "Campaign paused on platform");
        Ok(())
    }

    async fn update_campaign_budget(
        &self,
        account_ref: &str,
        campaign_ref: &str,
        amount: f64,
        budget_type: BudgetType,
    ) -> Result<(), AdsError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(AdsError::Api {
                status: 400,
                message: format!("invalid budget amount {amount}"),
            });
        }
        let url = self.campaign_url(account_ref, campaign_ref, "budget")?;
        self.post(
            url,
            &CampaignBudgetRequest {
                amount,
                budget_type,
            },
        )
        .await?;
        tracing::debug!(account_ref, campaign_ref, amount, "Campaign budget updated on platform");
        Ok(())
    }
}
