use std::future::Future;

use serde_json::{Map, Value as JsonValue};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::models::retry::RetryConfig;

/// Runs `operation` until it succeeds or `config.max_attempts` is reached.
///
/// The operation receives the 1-based attempt number.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(config, operation, |_| true).await
}

/// Like [`retry_with_backoff`], but gives up immediately on errors for which
/// `is_retryable` returns false.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    info!(attempt, max_attempts, "Retry succeeded");
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    warn!(attempt, error = %e, "Non-retryable failure, giving up");
                    return Err(e);
                }

                if attempt >= max_attempts {
                    warn!(
                        max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                let delay = jittered(config.delay_after(attempt), config.jitter);

                debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                sleep(delay).await;
            }
        }
    }
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }

    let factor = 1.0 + rand::random_range(-jitter..=jitter);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

/// Removes email and password-like keys from an outbound payload.
///
/// Applies at the top level and recursively inside `metadata`, whatever the
/// caller put there.
pub fn sanitize_payload(payload: &mut JsonValue) {
    let Some(object) = payload.as_object_mut() else {
        return;
    };

    strip_sensitive_keys(object);

    if let Some(metadata) = object.get_mut("metadata") {
        scrub_recursive(metadata);
    }
}

fn scrub_recursive(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            strip_sensitive_keys(map);
            for nested in map.values_mut() {
                scrub_recursive(nested);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                scrub_recursive(item);
            }
        }
        _ => {}
    }
}

fn strip_sensitive_keys(map: &mut Map<String, JsonValue>) {
    map.retain(|key, _| !is_sensitive_key(key));
}

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();

    key == "email"
        || key == "email_address"
        || key == "pwd"
        || key == "passwd"
        || key.contains("password")
        || key.contains("passcode")
}
