use std::fmt::{Display, Formatter, Result};

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::models::{consent::ConsentStats, delivery::ActionSummary};

/// What a single dispatch call ended up doing.
///
/// Only `Sent` means the notification reached the channel during this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Disabled,
    Rejected,
    Deferred,
    Throttled,
    ConsentRefused,
    Failed,
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        *self == DispatchOutcome::Sent
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Sent => "sent",
            DispatchOutcome::Disabled => "disabled",
            DispatchOutcome::Rejected => "rejected",
            DispatchOutcome::Deferred => "deferred",
            DispatchOutcome::Throttled => "throttled",
            DispatchOutcome::ConsentRefused => "consent_refused",
            DispatchOutcome::Failed => "failed",
        }
    }
}

impl Display for DispatchOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Another drain was already running, nothing was touched.
    pub skipped: bool,
    pub delivered: usize,
    /// Items resolved without a send: throttled, refused or invalid at replay time.
    pub suppressed: usize,
    pub expired: usize,
    /// Draining stopped with the head item still queued.
    pub halted: bool,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub success: bool,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub enabled: bool,
    pub channel_ready: bool,
    pub replay_queue_depth: usize,
    pub actions: Vec<ActionSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent: Option<ConsentStats>,
}
