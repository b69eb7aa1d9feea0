use std::{
    fmt::{Display, Formatter, Result},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
    Queued,
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DeliveryStatus::Success => write!(f, "success"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Queued => write!(f, "queued"),
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(DeliveryStatus::Success),
            "failed" => Ok(DeliveryStatus::Failed),
            "queued" => Ok(DeliveryStatus::Queued),
            other => Err(anyhow::anyhow!("Unknown delivery status '{}'", other)),
        }
    }
}

/// One append-only audit row describing the terminal outcome of a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub trace_id: Uuid,
    pub action_type: String,
    pub user_id: Option<String>,
    pub payload: JsonValue,
    pub status: DeliveryStatus,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryLogEntry {
    pub fn new(
        trace_id: Uuid,
        action_type: String,
        user_id: Option<String>,
        payload: JsonValue,
        status: DeliveryStatus,
    ) -> Self {
        Self {
            trace_id,
            action_type,
            user_id,
            payload,
            status,
            response_status: None,
            response_body: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_response(mut self, status: u16, body: Option<String>) -> Self {
        self.response_status = Some(status);
        self.response_body = body.filter(|b| !b.is_empty());
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error_message = Some(error);
        self
    }
}

/// Outcome counts for one action type over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub action_type: String,
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub queued: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
}
