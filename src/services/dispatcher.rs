use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Error, Result};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Value as JsonValue, json};
use tokio::{
    sync::{Mutex, Notify, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{Channel, ConsentStore, DeliveryLog},
    config::DispatcherSettings,
    models::{
        channel::ChannelError,
        consent::ConsentDecision,
        delivery::{DeliveryLogEntry, DeliveryStatus},
        outcome::{DispatchOutcome, DispatchSummary, DrainReport, TestReport},
        request::{DispatchRequest, ValidatedRequest},
        retry::RetryConfig,
    },
    services::{
        replay_queue::{ReplayQueue, ReplayQueueItem},
        throttle::{ThrottleKey, ThrottleState},
    },
    utils::{retry_with_backoff_if, sanitize_payload},
};

const PAYLOAD_SOURCE: &str = "website";
const TEST_ACTION_TYPE: &str = "test_webhook";
const SUMMARY_WINDOW_HOURS: i64 = 24;

struct Lifecycle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Consent-gated, throttled, retrying dispatcher for outbound automation
/// webhooks.
///
/// Build one per process, share it through `Arc`, call [`Dispatcher::start`]
/// to run the background replay task and [`Dispatcher::shutdown`] to stop it.
pub struct Dispatcher {
    channel: Option<Arc<dyn Channel>>,
    consent_store: Arc<dyn ConsentStore>,
    delivery_log: Arc<dyn DeliveryLog>,
    retry_config: RetryConfig,
    settings: DispatcherSettings,
    throttle: ThrottleState,
    queue: ReplayQueue,
    disabled_warned: AtomicBool,
    wake: Notify,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl Dispatcher {
    pub fn new(
        channel: Option<Arc<dyn Channel>>,
        consent_store: Arc<dyn ConsentStore>,
        delivery_log: Arc<dyn DeliveryLog>,
        retry_config: RetryConfig,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            channel,
            consent_store,
            delivery_log,
            retry_config,
            throttle: ThrottleState::new(settings.throttle_window),
            queue: ReplayQueue::new(settings.replay_queue_capacity, settings.replay_item_ttl),
            settings,
            disabled_warned: AtomicBool::new(false),
            wake: Notify::new(),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    pub fn is_channel_ready(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_ready())
    }

    pub fn replay_queue(&self) -> &ReplayQueue {
        &self.queue
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.len().await
    }

    /// Returns whether the notification was sent during this call.
    pub async fn dispatch(&self, request: DispatchRequest) -> bool {
        self.dispatch_outcome(request).await.is_sent()
    }

    pub async fn dispatch_outcome(&self, request: DispatchRequest) -> DispatchOutcome {
        let Some(channel) = self.channel.as_deref() else {
            if !self.disabled_warned.swap(true, Ordering::SeqCst) {
                warn!("Webhook URL not configured, automation disabled");
            }
            return DispatchOutcome::Disabled;
        };

        let user_id = request.user_id.clone();
        let action_type = request.action_type.clone();

        let request = match request.validate() {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    action_type = %action_type,
                    error = %e,
                    "Rejected invalid dispatch request"
                );
                return DispatchOutcome::Rejected;
            }
        };

        if !channel.is_ready() {
            self.defer(request).await;
            return DispatchOutcome::Deferred;
        }

        if self.take_throttle_slot(&request, None).await.is_none() {
            return DispatchOutcome::Throttled;
        }

        self.deliver(channel, &request).await
    }

    async fn defer(&self, request: ValidatedRequest) {
        info!(
            trace_id = %request.trace_id,
            user_id = %request.user_id,
            action_type = %request.action_type,
            "Channel not ready, deferring dispatch to replay queue"
        );

        let entry = DeliveryLogEntry::new(
            request.trace_id,
            request.action_type.to_string(),
            Some(request.user_id.clone()),
            build_payload(&request, request.contact_address.as_deref()),
            DeliveryStatus::Queued,
        );

        self.write_log(entry).await;

        if let Some(discarded) = self.queue.enqueue(request).await {
            self.log_discarded(&discarded, "discarded: replay queue full")
                .await;
        }
    }

    /// Takes the throttle slot for `request`. `previous` is the instant of
    /// this request's own failed attempt, whose window does not block it.
    async fn take_throttle_slot(
        &self,
        request: &ValidatedRequest,
        previous: Option<Instant>,
    ) -> Option<Instant> {
        let key = ThrottleKey::new(&request.user_id, request.action_type);

        let slot = match previous {
            Some(previous) => self.throttle.try_resume(key, previous).await,
            None => self.throttle.try_acquire(key).await,
        };

        if slot.is_none() {
            info!(
                user_id = %request.user_id,
                action_type = %request.action_type,
                "Dispatch throttled"
            );
        }
        slot
    }

    async fn deliver(&self, channel: &dyn Channel, request: &ValidatedRequest) -> DispatchOutcome {
        let record = match self.consent_store.get_consent(&request.user_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    user_id = %request.user_id,
                    error = %e,
                    "Consent lookup failed, treating as not consented"
                );
                return DispatchOutcome::ConsentRefused;
            }
        };

        let decision = ConsentDecision::evaluate(
            request.action_type.consent_class(),
            record.as_ref(),
            request.contact_address.as_deref(),
        );

        if !decision.is_granted() {
            info!(
                user_id = %request.user_id,
                action_type = %request.action_type,
                reason = decision.as_str(),
                "User has not consented, dispatch skipped"
            );
            return DispatchOutcome::ConsentRefused;
        }

        let contact = request
            .contact_address
            .clone()
            .or_else(|| record.and_then(|r| r.contact_address))
            .filter(|c| !c.trim().is_empty());

        let payload = build_payload(request, contact.as_deref());

        let result = retry_with_backoff_if(
            &self.retry_config,
            |attempt| channel.send(&payload, attempt),
            ChannelError::is_transient,
        )
        .await;

        let entry = DeliveryLogEntry::new(
            request.trace_id,
            request.action_type.to_string(),
            Some(request.user_id.clone()),
            payload,
            DeliveryStatus::Success,
        );

        match result {
            Ok(response) => {
                info!(
                    trace_id = %request.trace_id,
                    user_id = %request.user_id,
                    action_type = %request.action_type,
                    status = response.status,
                    "Webhook triggered successfully"
                );
                self.write_log(entry.with_response(response.status, Some(response.body)))
                    .await;
                DispatchOutcome::Sent
            }
            Err(e) => {
                warn!(
                    trace_id = %request.trace_id,
                    user_id = %request.user_id,
                    action_type = %request.action_type,
                    error = %e,
                    "Failed to trigger webhook"
                );
                let mut entry = DeliveryLogEntry {
                    status: DeliveryStatus::Failed,
                    ..entry
                };
                if let ChannelError::Status { status, body } = &e {
                    entry = entry.with_response(*status, Some(body.clone()));
                }
                self.write_log(entry.with_error(e.to_string())).await;
                DispatchOutcome::Failed
            }
        }
    }

    /// Replays queued requests from the head until the queue is empty or an
    /// item fails to send.
    ///
    /// A concurrent call while a drain is running returns a skipped report.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();

        let Some(channel) = self.channel.as_deref() else {
            report.remaining = self.queue.len().await;
            return report;
        };

        let Some(_guard) = self.queue.try_begin_drain() else {
            debug!("Replay drain already in progress");
            report.skipped = true;
            report.remaining = self.queue.len().await;
            return report;
        };

        while let Some(item) = self.queue.claim_front().await {
            if self.queue.is_expired(&item) {
                if self.queue.remove_if_head(item.seq).await {
                    self.log_discarded(&item, "discarded: expired in replay queue")
                        .await;
                    report.expired += 1;
                }
                continue;
            }

            if !channel.is_ready() {
                report.halted = true;
                break;
            }

            let Some(attempted_at) = self
                .take_throttle_slot(&item.request, item.last_attempt)
                .await
            else {
                debug!(seq = item.seq, "Queued dispatch throttled at replay, dropping");
                self.queue.remove_if_head(item.seq).await;
                report.suppressed += 1;
                continue;
            };

            match self.deliver(channel, &item.request).await {
                DispatchOutcome::Sent => {
                    self.queue.remove_if_head(item.seq).await;
                    report.delivered += 1;
                }
                DispatchOutcome::Failed => {
                    self.queue
                        .record_failed_attempt(item.seq, attempted_at)
                        .await;
                    warn!(
                        seq = item.seq,
                        user_id = %item.request.user_id,
                        action_type = %item.request.action_type,
                        replay_attempts = item.replay_attempts + 1,
                        "Replay failed, halting queue to preserve ordering"
                    );
                    report.halted = true;
                    break;
                }
                outcome => {
                    debug!(
                        seq = item.seq,
                        outcome = %outcome,
                        "Queued dispatch resolved without sending"
                    );
                    self.queue.remove_if_head(item.seq).await;
                    report.suppressed += 1;
                }
            }
        }

        report.remaining = self.queue.len().await;
        report
    }

    /// Asks the background task to run a replay pass now.
    pub fn request_drain(&self) {
        self.wake.notify_one();
    }

    pub async fn start(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            warn!("Dispatcher already started");
            return;
        }

        let (shutdown, receiver) = watch::channel(false);
        let dispatcher = Arc::clone(self);
        let handle = tokio::spawn(async move { dispatcher.run_background(receiver).await });

        *lifecycle = Some(Lifecycle { shutdown, handle });
    }

    /// Stops the background task, letting an in-progress drain finish first.
    pub async fn shutdown(&self) {
        let Some(lifecycle) = self.lifecycle.lock().await.take() else {
            return;
        };

        let _ = lifecycle.shutdown.send(true);
        if let Err(e) = lifecycle.handle.await {
            warn!(error = %e, "Background replay task ended abnormally");
        }

        let remaining = self.queue.len().await;
        info!(remaining, "Dispatcher shut down");
    }

    async fn run_background(&self, mut shutdown: watch::Receiver<bool>) {
        let mut replay_tick = interval(self.settings.replay_interval);
        replay_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cleanup_tick = interval(self.settings.log_cleanup_interval);
        cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.settings.replay_interval.as_secs(),
            "Background replay processing started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = replay_tick.tick() => self.replay_pass().await,
                _ = self.wake.notified() => self.replay_pass().await,
                _ = cleanup_tick.tick() => {
                    self.purge_expired_logs().await;
                }
            }
        }

        info!("Background replay processing stopped");
    }

    async fn replay_pass(&self) {
        let Some(channel) = self.channel.as_deref() else {
            return;
        };

        if !channel.is_ready() {
            if !channel.initialize().await {
                let depth = self.queue.len().await;
                debug!(depth, "Channel not ready, replay deferred");
                return;
            }
            info!("Channel became ready, draining replay queue");
        }

        if self.queue.is_empty().await {
            return;
        }

        let report = self.drain().await;
        info!(
            delivered = report.delivered,
            suppressed = report.suppressed,
            expired = report.expired,
            halted = report.halted,
            remaining = report.remaining,
            "Replay pass completed"
        );
    }

    /// Deletes delivery log entries older than the retention period.
    pub async fn purge_expired_logs(&self) -> u64 {
        let cutoff = Utc::now() - ChronoDuration::days(self.settings.log_retention_days);

        match self.delivery_log.purge_older_than(cutoff).await {
            Ok(deleted) => {
                info!(deleted, "Cleaned up old delivery logs");
                deleted
            }
            Err(e) => {
                warn!(error = %e, "Failed to clean up old delivery logs");
                0
            }
        }
    }

    /// Posts one synthetic payload, bypassing consent, throttle and retries.
    pub async fn send_test(&self) -> TestReport {
        let Some(channel) = self.channel.as_deref() else {
            return TestReport {
                success: false,
                message: "Webhook URL not configured".to_string(),
                status: None,
                response: None,
                error: None,
            };
        };

        let payload = json!({
            "test": true,
            "action_type": TEST_ACTION_TYPE,
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": {
                "source": PAYLOAD_SOURCE,
                "environment": self.settings.environment,
            },
        });

        match channel.send(&payload, 1).await {
            Ok(response) => TestReport {
                success: true,
                message: "Test webhook successful".to_string(),
                status: Some(response.status),
                response: Some(parse_body(&response.body)),
                error: None,
            },
            Err(e) => TestReport {
                success: false,
                message: "Test webhook failed".to_string(),
                status: e.status(),
                response: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Outcome counts per action type over the last 24 hours.
    pub async fn summary(&self) -> DispatchSummary {
        let since = Utc::now() - ChronoDuration::hours(SUMMARY_WINDOW_HOURS);

        let actions = self.delivery_log.summarize(since).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to summarize delivery logs");
            Vec::new()
        });

        let consent = match self.consent_store.consent_stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Failed to get consent stats");
                None
            }
        };

        DispatchSummary {
            enabled: self.is_enabled(),
            channel_ready: self.is_channel_ready(),
            replay_queue_depth: self.queue.len().await,
            actions,
            consent,
        }
    }

    pub async fn recent_logs(
        &self,
        user_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DeliveryLogEntry>, Error> {
        self.delivery_log.recent(user_id, limit.clamp(1, 500)).await
    }

    pub async fn check_delivery_log(&self) -> Result<(), Error> {
        self.delivery_log.health_check().await
    }

    async fn log_discarded(&self, item: &ReplayQueueItem, reason: &str) {
        warn!(
            seq = item.seq,
            user_id = %item.request.user_id,
            action_type = %item.request.action_type,
            reason,
            "Dropping queued dispatch"
        );

        let entry = DeliveryLogEntry::new(
            item.request.trace_id,
            item.request.action_type.to_string(),
            Some(item.request.user_id.clone()),
            build_payload(&item.request, item.request.contact_address.as_deref()),
            DeliveryStatus::Failed,
        )
        .with_error(reason.to_string());

        self.write_log(entry).await;
    }

    async fn write_log(&self, entry: DeliveryLogEntry) {
        if let Err(e) = self.delivery_log.record(entry).await {
            error!(error = %e, "Failed to write delivery log");
        }
    }
}

/// The body posted to the channel, already stripped of sensitive keys.
pub fn build_payload(request: &ValidatedRequest, contact: Option<&str>) -> JsonValue {
    let mut payload = json!({
        "trace_id": request.trace_id,
        "user_id": request.user_id,
        "phone": contact,
        "action_type": request.action_type,
        "timestamp": request.timestamp.to_rfc3339(),
        "metadata": request.metadata,
        "source": PAYLOAD_SOURCE,
    });

    sanitize_payload(&mut payload);
    payload
}

fn parse_body(body: &str) -> JsonValue {
    serde_json::from_str(body).unwrap_or_else(|_| JsonValue::String(body.to_string()))
}
