use std::collections::HashMap;

use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::models::request::ActionType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub user_id: String,
    pub action_type: ActionType,
}

impl ThrottleKey {
    pub fn new(user_id: &str, action_type: ActionType) -> Self {
        Self {
            user_id: user_id.to_string(),
            action_type,
        }
    }
}

/// Last attempt time per `(user, action)`.
///
/// Entries are overwritten on every attempt and never swept; a stale entry
/// just stops blocking once the window has passed. Lives as long as the
/// process.
pub struct ThrottleState {
    window: Duration,
    last_attempt: Mutex<HashMap<ThrottleKey, Instant>>,
}

impl ThrottleState {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_attempt: Mutex::new(HashMap::new()),
        }
    }

    /// Records an attempt for `key` unless one was recorded within the window,
    /// returning the instant it recorded.
    ///
    /// Check and write happen under one lock, so of two concurrent callers
    /// for the same key only one gets `Some`.
    pub async fn try_acquire(&self, key: ThrottleKey) -> Option<Instant> {
        self.acquire(key, None).await
    }

    /// Like [`ThrottleState::try_acquire`] for a retry of an attempt made at
    /// `previous`: the window that attempt opened does not block it, but a
    /// window opened by any later attempt on the same key does.
    pub async fn try_resume(&self, key: ThrottleKey, previous: Instant) -> Option<Instant> {
        self.acquire(key, Some(previous)).await
    }

    async fn acquire(&self, key: ThrottleKey, previous: Option<Instant>) -> Option<Instant> {
        let now = Instant::now();
        let mut last_attempt = self.last_attempt.lock().await;

        if let Some(recorded) = last_attempt.get(&key) {
            let own_window = previous == Some(*recorded);
            if !own_window && now.duration_since(*recorded) < self.window {
                return None;
            }
        }

        last_attempt.insert(key, now);
        Some(now)
    }

    pub async fn len(&self) -> usize {
        self.last_attempt.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.last_attempt.lock().await.is_empty()
    }
}
