use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use automation_dispatch::{
    clients::{
        Channel, ConsentStore, DeliveryLog,
        memory::{MemoryConsentStore, MemoryDeliveryLog},
    },
    config::DispatcherSettings,
    models::{
        channel::{ChannelError, ChannelResponse},
        consent::ConsentRecord,
        retry::RetryConfig,
    },
    services::dispatcher::Dispatcher,
};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone)]
pub struct Attempt {
    pub payload: JsonValue,
    pub attempt: u32,
    pub delivered: bool,
}

impl Attempt {
    pub fn user_id(&self) -> &str {
        self.payload
            .get("user_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }
}

/// Scriptable in-process channel that records every send attempt.
#[derive(Default)]
pub struct FakeChannel {
    ready: AtomicBool,
    ready_on_initialize: AtomicBool,
    fail_first: AtomicU32,
    fail_status: Mutex<Option<u16>>,
    fail_users: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    attempts: Mutex<Vec<Attempt>>,
}

impl FakeChannel {
    pub fn ready() -> Arc<Self> {
        let channel = Self::default();
        channel.ready.store(true, Ordering::SeqCst);
        Arc::new(channel)
    }

    pub fn not_ready() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_ready_on_initialize(&self, ready: bool) {
        self.ready_on_initialize.store(ready, Ordering::SeqCst);
    }

    /// Fails the next `n` sends with a 503.
    pub fn fail_first(&self, n: u32) {
        self.fail_first.store(n, Ordering::SeqCst);
    }

    /// Fails every send with `status`; `None` restores success.
    pub fn fail_with_status(&self, status: Option<u16>) {
        *self.fail_status.lock().unwrap() = status;
    }

    pub fn fail_for_user(&self, user_id: &str) {
        self.fail_users.lock().unwrap().insert(user_id.to_string());
    }

    pub fn clear_user_failures(&self) {
        self.fail_users.lock().unwrap().clear();
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn delivered_users(&self) -> Vec<String> {
        self.attempts()
            .iter()
            .filter(|a| a.delivered)
            .map(|a| a.user_id().to_string())
            .collect()
    }

    pub fn attempted_users(&self) -> Vec<String> {
        self.attempts()
            .iter()
            .map(|a| a.user_id().to_string())
            .collect()
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> bool {
        if self.ready_on_initialize.load(Ordering::SeqCst) {
            self.ready.store(true, Ordering::SeqCst);
        }
        self.is_ready()
    }

    async fn send(
        &self,
        payload: &JsonValue,
        attempt: u32,
    ) -> Result<ChannelResponse, ChannelError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let user_id = payload
            .get("user_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let result = if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err(ChannelError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        } else if self.fail_users.lock().unwrap().contains(&user_id) {
            Err(ChannelError::Connect("connection refused".to_string()))
        } else if let Some(status) = *self.fail_status.lock().unwrap() {
            Err(ChannelError::Status {
                status,
                body: "rejected".to_string(),
            })
        } else {
            Ok(ChannelResponse {
                status: 200,
                body: r#"{"ok":true}"#.to_string(),
            })
        };

        self.attempts.lock().unwrap().push(Attempt {
            payload: payload.clone(),
            attempt,
            delivered: result.is_ok(),
        });

        result
    }
}

pub fn test_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay_ms: 100,
        max_delay_ms: 1000,
        jitter: 0.0,
    }
}

pub fn test_settings() -> DispatcherSettings {
    DispatcherSettings {
        replay_interval: Duration::from_secs(30),
        ..Default::default()
    }
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub channel: Arc<FakeChannel>,
    pub consent: Arc<MemoryConsentStore>,
    pub log: Arc<MemoryDeliveryLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeChannel::ready(), test_settings())
    }

    pub fn not_ready() -> Self {
        Self::with(FakeChannel::not_ready(), test_settings())
    }

    pub fn with(channel: Arc<FakeChannel>, settings: DispatcherSettings) -> Self {
        let consent = Arc::new(MemoryConsentStore::new());
        let log = Arc::new(MemoryDeliveryLog::new());

        let dyn_channel: Arc<dyn Channel> = channel.clone();
        let dyn_consent: Arc<dyn ConsentStore> = consent.clone();
        let dyn_log: Arc<dyn DeliveryLog> = log.clone();

        let dispatcher = Arc::new(Dispatcher::new(
            Some(dyn_channel),
            dyn_consent,
            dyn_log,
            test_retry_config(),
            settings,
        ));

        Self {
            dispatcher,
            channel,
            consent,
            log,
        }
    }

    /// A dispatcher with no endpoint configured.
    pub fn disabled() -> (Arc<Dispatcher>, Arc<MemoryDeliveryLog>) {
        let log = Arc::new(MemoryDeliveryLog::new());
        let dyn_log: Arc<dyn DeliveryLog> = log.clone();
        let consent: Arc<dyn ConsentStore> = Arc::new(MemoryConsentStore::new());

        let dispatcher = Arc::new(Dispatcher::new(
            None,
            consent,
            dyn_log,
            test_retry_config(),
            test_settings(),
        ));

        (dispatcher, log)
    }

    pub async fn grant_primary(&self, user_id: &str, contact: Option<&str>) {
        self.consent
            .set(
                user_id,
                ConsentRecord {
                    primary_consent: true,
                    marketing_consent: false,
                    contact_address: contact.map(str::to_string),
                },
            )
            .await;
    }

    pub async fn grant_all(&self, user_id: &str, contact: &str) {
        self.consent
            .set(
                user_id,
                ConsentRecord {
                    primary_consent: true,
                    marketing_consent: true,
                    contact_address: Some(contact.to_string()),
                },
            )
            .await;
    }
}
