use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::retry::RetryConfig;

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub n8n_webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,
    #[serde(default = "default_webhook_source")]
    pub webhook_source: String,
    #[serde(default)]
    pub webhook_assume_ready: bool,

    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default)]
    pub retry_jitter: f64,

    #[serde(default = "default_throttle_window_seconds")]
    pub throttle_window_seconds: u64,

    #[serde(default = "default_replay_interval_seconds")]
    pub replay_interval_seconds: u64,
    #[serde(default = "default_replay_queue_capacity")]
    pub replay_queue_capacity: usize,
    #[serde(default = "default_replay_item_ttl_seconds")]
    pub replay_item_ttl_seconds: u64,

    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: i64,
    #[serde(default = "default_log_cleanup_interval_hours")]
    pub log_cleanup_interval_hours: u64,

    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

/// Tunables for the dispatcher and its background replay task.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub throttle_window: Duration,
    pub replay_interval: Duration,
    pub replay_queue_capacity: usize,
    pub replay_item_ttl: Duration,
    pub log_retention_days: i64,
    pub log_cleanup_interval: Duration,
    pub environment: String,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            throttle_window: Duration::from_secs(default_throttle_window_seconds()),
            replay_interval: Duration::from_secs(default_replay_interval_seconds()),
            replay_queue_capacity: default_replay_queue_capacity(),
            replay_item_ttl: Duration::from_secs(default_replay_item_ttl_seconds()),
            log_retention_days: default_log_retention_days(),
            log_cleanup_interval: Duration::from_secs(default_log_cleanup_interval_hours() * 3600),
            environment: default_environment(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub url: String,
    pub timeout: Duration,
    pub source: String,
    pub assume_ready: bool,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.max_retry_attempts == 0 {
            return Err(anyhow!("MAX_RETRY_ATTEMPTS must be at least 1"));
        }

        if !(0.0..1.0).contains(&self.retry_jitter) {
            return Err(anyhow!("RETRY_JITTER must be within [0.0, 1.0)"));
        }

        if self.replay_queue_capacity == 0 {
            return Err(anyhow!("REPLAY_QUEUE_CAPACITY must be at least 1"));
        }

        if let Some(url) = self.webhook_url() {
            reqwest::Url::parse(url).map_err(|e| anyhow!("Invalid N8N_WEBHOOK_URL: {}", e))?;
        }

        Ok(())
    }

    /// The configured endpoint, treating an empty variable as unset.
    pub fn webhook_url(&self) -> Option<&str> {
        self.n8n_webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            jitter: self.retry_jitter,
        }
    }

    pub fn webhook_settings(&self) -> Option<WebhookSettings> {
        self.webhook_url().map(|url| WebhookSettings {
            url: url.to_string(),
            timeout: Duration::from_millis(self.webhook_timeout_ms),
            source: self.webhook_source.clone(),
            assume_ready: self.webhook_assume_ready,
        })
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            throttle_window: Duration::from_secs(self.throttle_window_seconds),
            replay_interval: Duration::from_secs(self.replay_interval_seconds.max(1)),
            replay_queue_capacity: self.replay_queue_capacity,
            replay_item_ttl: Duration::from_secs(self.replay_item_ttl_seconds),
            log_retention_days: self.log_retention_days,
            log_cleanup_interval: Duration::from_secs(self.log_cleanup_interval_hours.max(1) * 3600),
            environment: self.environment.clone(),
        }
    }
}

fn default_webhook_timeout_ms() -> u64 {
    10_000
}

fn default_webhook_source() -> String {
    "automation-dispatch".to_string()
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    10_000
}

fn default_throttle_window_seconds() -> u64 {
    60
}

fn default_replay_interval_seconds() -> u64 {
    30
}

fn default_replay_queue_capacity() -> usize {
    1000
}

fn default_replay_item_ttl_seconds() -> u64 {
    24 * 60 * 60
}

fn default_log_retention_days() -> i64 {
    30
}

fn default_log_cleanup_interval_hours() -> u64 {
    24
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_server_port() -> u16 {
    8080
}
