pub mod database;
pub mod health;
pub mod memory;
pub mod webhook;

use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::models::{
    channel::{ChannelError, ChannelResponse},
    consent::{ConsentRecord, ConsentStats},
    delivery::{ActionSummary, DeliveryLogEntry},
};

/// Transport to the third-party workflow endpoint. Pure I/O: consent,
/// throttling, retries and sanitization all happen in the dispatcher.
#[async_trait]
pub trait Channel: Send + Sync {
    fn is_ready(&self) -> bool;

    /// Tries to bring the channel up, returning whether it is now ready.
    async fn initialize(&self) -> bool;

    async fn send(&self, payload: &JsonValue, attempt: u32)
    -> Result<ChannelResponse, ChannelError>;
}

#[async_trait]
pub trait ConsentStore: Send + Sync {
    /// `None` when the user has no stored profile.
    async fn get_consent(&self, user_id: &str) -> Result<Option<ConsentRecord>, Error>;

    async fn consent_stats(&self) -> Result<ConsentStats, Error>;
}

#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn record(&self, entry: DeliveryLogEntry) -> Result<(), Error>;

    /// Newest first, optionally restricted to one user.
    async fn recent(&self, user_id: Option<&str>, limit: i64)
    -> Result<Vec<DeliveryLogEntry>, Error>;

    async fn summarize(&self, since: DateTime<Utc>) -> Result<Vec<ActionSummary>, Error>;

    /// Deletes entries created before `cutoff`, returning how many went.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error>;

    async fn health_check(&self) -> Result<(), Error>;
}
