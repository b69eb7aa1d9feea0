use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct ChannelResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

impl ChannelError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Client errors are permanent except 408 and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            ChannelError::Status { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            _ => true,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ChannelError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
