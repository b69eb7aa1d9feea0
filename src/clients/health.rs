use std::{collections::BTreeMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    models::health::{ComponentHealth, HealthReport, HealthStatus},
    services::dispatcher::Dispatcher,
};

const DELIVERY_LOG: &str = "delivery_log";
const WEBHOOK_CHANNEL: &str = "webhook_channel";

pub struct HealthChecker {
    dispatcher: Arc<Dispatcher>,
}

impl HealthChecker {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn report(&self) -> HealthReport {
        let mut components = BTreeMap::new();
        components.insert(DELIVERY_LOG.to_string(), self.delivery_log().await);
        components.insert(WEBHOOK_CHANNEL.to_string(), self.channel());

        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthReport {
            status,
            timestamp: Utc::now(),
            automation_enabled: self.dispatcher.is_enabled(),
            replay_queue_depth: self.dispatcher.queue_depth().await,
            components,
        }
    }

    async fn delivery_log(&self) -> ComponentHealth {
        let start = Instant::now();

        match self.dispatcher.check_delivery_log().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(latency_ms = elapsed, "Delivery log reachable");
                ComponentHealth::up(Some(elapsed))
            }
            Err(e) => {
                warn!(error = %e, "Delivery log health check failed");
                ComponentHealth::down(format!("delivery log unreachable: {}", e))
            }
        }
    }

    // A disabled or not-yet-ready channel degrades service but loses nothing.
    fn channel(&self) -> ComponentHealth {
        if !self.dispatcher.is_enabled() {
            ComponentHealth::degraded("N8N_WEBHOOK_URL not configured")
        } else if self.dispatcher.is_channel_ready() {
            ComponentHealth::up(None)
        } else {
            ComponentHealth::degraded("channel not ready, dispatches are queued")
        }
    }
}
