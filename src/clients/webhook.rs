use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::{
    clients::Channel,
    config::WebhookSettings,
    models::channel::{ChannelError, ChannelResponse},
};

const USER_AGENT: &str = concat!("automation-dispatch/", env!("CARGO_PKG_VERSION"));

/// Posts dispatch payloads to the configured workflow webhook.
pub struct WebhookChannel {
    http_client: Client,
    url: String,
    source: String,
    timeout_ms: u64,
    ready: AtomicBool,
}

impl WebhookChannel {
    pub fn new(settings: &WebhookSettings) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        info!(
            url = %settings.url,
            timeout_ms = settings.timeout.as_millis() as u64,
            "Webhook channel initialized"
        );

        Ok(Self {
            http_client,
            url: settings.url.clone(),
            source: settings.source.clone(),
            timeout_ms: settings.timeout.as_millis() as u64,
            ready: AtomicBool::new(settings.assume_ready),
        })
    }

    fn classify(&self, error: reqwest::Error) -> ChannelError {
        if error.is_timeout() {
            ChannelError::Timeout(self.timeout_ms)
        } else if error.is_connect() {
            ChannelError::Connect(error.to_string())
        } else {
            ChannelError::Other(error.to_string())
        }
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> bool {
        if self.is_ready() {
            return true;
        }

        // Any HTTP answer, even 404/405, means the endpoint is reachable.
        match self.http_client.get(&self.url).send().await {
            Ok(response) => {
                info!(
                    url = %self.url,
                    status = response.status().as_u16(),
                    "Webhook endpoint reachable, channel ready"
                );
                self.ready.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Webhook endpoint not reachable yet");
                false
            }
        }
    }

    async fn send(
        &self,
        payload: &JsonValue,
        attempt: u32,
    ) -> Result<ChannelResponse, ChannelError> {
        let trace_id = payload
            .get("trace_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        debug!(attempt, trace_id, "Posting payload to webhook");

        let response = self
            .http_client
            .post(&self.url)
            .header("X-Webhook-Source", &self.source)
            .header("X-Attempt", attempt.to_string())
            .header("X-Trace-Id", trace_id)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            self.ready.store(true, Ordering::SeqCst);
            Ok(ChannelResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(ChannelError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
