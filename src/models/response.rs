use serde::Serialize;

use crate::stats::StatsSnapshot;

/// Terminal success/failure message returned by the send endpoints
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attempts: None,
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub rate_limit: StatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub rate_limit_store: String,
    pub transport: String,
    pub timestamp: String,
}
