use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::models::request::ValidatedRequest;

#[derive(Debug, Clone)]
pub struct ReplayQueueItem {
    pub seq: u64,
    pub request: ValidatedRequest,
    pub enqueued_at: DateTime<Utc>,
    /// Replays of this item that reached the channel and failed.
    pub replay_attempts: u32,
    /// When the last failed replay took its throttle slot.
    pub last_attempt: Option<Instant>,
    enqueued_instant: Instant,
}

impl ReplayQueueItem {
    pub fn age(&self) -> Duration {
        self.enqueued_instant.elapsed()
    }
}

/// FIFO of requests deferred while the channel was not ready.
///
/// Bounded: once `capacity` is reached the oldest item is discarded to make
/// room. The head claimed by a running drain is never discarded; the next
/// oldest goes instead, or the new item itself when nothing else is queued.
/// Items older than `ttl` are reported as expired (a zero `ttl` keeps
/// items forever).
pub struct ReplayQueue {
    items: Mutex<VecDeque<ReplayQueueItem>>,
    next_seq: AtomicU64,
    /// Seq of the head a drain is replaying, 0 when none.
    in_flight: AtomicU64,
    capacity: usize,
    ttl: Duration,
    draining: AtomicBool,
}

impl ReplayQueue {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(1),
            in_flight: AtomicU64::new(0),
            capacity: capacity.max(1),
            ttl,
            draining: AtomicBool::new(false),
        }
    }

    /// Appends `request` to the tail, returning the item discarded to make
    /// room, if any.
    pub async fn enqueue(&self, request: ValidatedRequest) -> Option<ReplayQueueItem> {
        let item = ReplayQueueItem {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            request,
            enqueued_at: Utc::now(),
            replay_attempts: 0,
            last_attempt: None,
            enqueued_instant: Instant::now(),
        };

        let mut items = self.items.lock().await;
        let mut discarded = None;

        if items.len() >= self.capacity {
            let in_flight = self.in_flight.load(Ordering::SeqCst);
            let head_in_flight = items.front().is_some_and(|head| head.seq == in_flight);

            if head_in_flight && items.len() == 1 {
                warn!(
                    seq = item.seq,
                    user_id = %item.request.user_id,
                    action_type = %item.request.action_type,
                    capacity = self.capacity,
                    "Replay queue full with its head in flight, discarding new item"
                );
                return Some(item);
            }

            discarded = items.remove(usize::from(head_in_flight));

            if let Some(dropped) = &discarded {
                warn!(
                    seq = dropped.seq,
                    user_id = %dropped.request.user_id,
                    action_type = %dropped.request.action_type,
                    capacity = self.capacity,
                    "Replay queue full, discarding oldest item"
                );
            }
        }

        debug!(
            seq = item.seq,
            user_id = %item.request.user_id,
            action_type = %item.request.action_type,
            depth = items.len() + 1,
            "Queued dispatch for later replay"
        );

        items.push_back(item);
        discarded
    }

    pub async fn front(&self) -> Option<ReplayQueueItem> {
        self.items.lock().await.front().cloned()
    }

    /// Returns the head and marks it in flight until the next claim or the
    /// end of the drain, so overflow will not discard it mid-replay.
    pub async fn claim_front(&self) -> Option<ReplayQueueItem> {
        let items = self.items.lock().await;
        let head = items.front().cloned();
        let seq = head.as_ref().map_or(0, |item| item.seq);
        self.in_flight.store(seq, Ordering::SeqCst);
        head
    }

    /// Pops the head only if it is still the item with `seq`.
    pub async fn remove_if_head(&self, seq: u64) -> bool {
        let mut items = self.items.lock().await;

        if items.front().map(|item| item.seq) == Some(seq) {
            items.pop_front();
            true
        } else {
            false
        }
    }

    pub async fn record_failed_attempt(&self, seq: u64, attempted_at: Instant) {
        let mut items = self.items.lock().await;

        if let Some(item) = items.iter_mut().find(|item| item.seq == seq) {
            item.replay_attempts += 1;
            item.last_attempt = Some(attempted_at);
        }
    }

    pub fn is_expired(&self, item: &ReplayQueueItem) -> bool {
        !self.ttl.is_zero() && item.age() >= self.ttl
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Copies of the queued items, head first.
    pub async fn snapshot(&self) -> Vec<ReplayQueueItem> {
        self.items.lock().await.iter().cloned().collect()
    }

    /// Claims the single drain slot, or `None` if a drain is already running.
    pub fn try_begin_drain(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| DrainGuard {
                flag: &self.draining,
                in_flight: &self.in_flight,
            })
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

pub struct DrainGuard<'a> {
    flag: &'a AtomicBool,
    in_flight: &'a AtomicU64,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.store(0, Ordering::SeqCst);
        self.flag.store(false, Ordering::SeqCst);
    }
}
