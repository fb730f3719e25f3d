use abpilot::BudgetType;
use serde::{Deserialize, Serialize};

/// Body of POST /v1/accounts/{account}/campaigns/{campaign}/status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignStatusRequest {
    pub status: String,
}

impl CampaignStatusRequest {
    pub fn paused() -> Self {
        Self {
            status: "PAUSED".to_string(),
        }
    }
}

/// Body of POST /v1/accounts/{account}/campaigns/{campaign}/budget
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignBudgetRequest {
    pub amount: f64,
    pub budget_type: BudgetType,
}

/// Error envelope returned by the platform on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<ApiErrorDetail>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    pub message: String,
}

impl ApiErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.error.map(|e| e.message).or(self.message)
    }
}
