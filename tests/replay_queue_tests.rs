use std::{sync::Arc, time::Duration};

use anyhow::Result;
use automation_dispatch::{
    config::DispatcherSettings,
    models::{
        delivery::DeliveryStatus,
        outcome::{DispatchOutcome, DrainReport},
        request::{ActionType, DispatchRequest},
    },
    services::replay_queue::ReplayQueue,
};

use crate::common::{FakeChannel, Harness, test_settings};

async fn defer(harness: &Harness, user_id: &str, action_type: ActionType) -> Result<()> {
    let outcome = harness
        .dispatcher
        .dispatch_outcome(DispatchRequest::new(user_id, action_type))
        .await;
    anyhow::ensure!(
        outcome == DispatchOutcome::Deferred,
        "expected deferral, got {}",
        outcome
    );
    Ok(())
}

/// Test: A failing item halts the drain and keeps its place at the head
#[tokio::test(start_paused = true)]
async fn test_drain_preserves_order_across_failures() -> Result<()> {
    let harness = Harness::not_ready();
    for user in ["ua", "ub", "uc"] {
        harness.grant_primary(user, Some("+15550000")).await;
        defer(&harness, user, ActionType::ProfileCompleted).await?;
    }
    assert_eq!(harness.dispatcher.queue_depth().await, 3);

    harness.channel.set_ready(true);
    harness.channel.fail_for_user("ub");

    let report = harness.dispatcher.drain().await;
    assert_eq!(report.delivered, 1);
    assert!(report.halted);
    assert_eq!(report.remaining, 2);
    assert_eq!(harness.channel.delivered_users(), vec!["ua"]);
    assert!(
        !harness.channel.attempted_users().contains(&"uc".to_string()),
        "Nothing behind a failed head may be attempted"
    );

    let queued = harness.dispatcher.replay_queue().snapshot().await;
    assert_eq!(queued[0].request.user_id, "ub");
    assert_eq!(queued[0].replay_attempts, 1);
    assert_eq!(queued[1].request.user_id, "uc");

    harness.channel.clear_user_failures();

    let report = harness.dispatcher.drain().await;
    assert_eq!(report.delivered, 2);
    assert!(!report.halted);
    assert_eq!(report.remaining, 0);
    assert_eq!(harness.channel.delivered_users(), vec!["ua", "ub", "uc"]);

    let statuses: Vec<_> = harness
        .log
        .entries()
        .await
        .iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            DeliveryStatus::Queued,
            DeliveryStatus::Queued,
            DeliveryStatus::Queued,
            DeliveryStatus::Success,
            DeliveryStatus::Failed,
            DeliveryStatus::Success,
            DeliveryStatus::Success,
        ]
    );

    Ok(())
}

/// Test: A failed replay does not resend once a fresh dispatch has gone out
#[tokio::test(start_paused = true)]
async fn test_failed_replay_does_not_resend_after_fresh_dispatch() -> Result<()> {
    let harness = Harness::not_ready();
    harness.grant_primary("u1", Some("+15550001")).await;
    defer(&harness, "u1", ActionType::ProfileCompleted).await?;

    harness.channel.set_ready(true);
    harness.channel.fail_for_user("u1");

    let report = harness.dispatcher.drain().await;
    assert!(report.halted);
    assert_eq!(report.remaining, 1);

    let queued = harness.dispatcher.replay_queue().snapshot().await;
    assert!(queued[0].last_attempt.is_some());

    harness.channel.clear_user_failures();
    tokio::time::advance(Duration::from_secs(61)).await;

    let outcome = harness
        .dispatcher
        .dispatch_outcome(DispatchRequest::new("u1", ActionType::ProfileCompleted))
        .await;
    assert_eq!(outcome, DispatchOutcome::Sent);

    let report = harness.dispatcher.drain().await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.suppressed, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(
        harness.channel.delivered_users(),
        vec!["u1"],
        "The queued copy must not go out inside the fresh send's window"
    );

    Ok(())
}

/// Test: A failed replay retried right away is not blocked by its own window
#[tokio::test(start_paused = true)]
async fn test_failed_replay_retries_inside_own_window() -> Result<()> {
    let harness = Harness::not_ready();
    harness.grant_primary("u1", Some("+15550001")).await;
    defer(&harness, "u1", ActionType::ProfileCompleted).await?;

    harness.channel.set_ready(true);
    harness.channel.fail_for_user("u1");
    assert!(harness.dispatcher.drain().await.halted);

    harness.channel.fail_for_user("u1");
    let report = harness.dispatcher.drain().await;
    assert!(report.halted, "Second failure keeps the item queued");

    let queued = harness.dispatcher.replay_queue().snapshot().await;
    assert_eq!(queued[0].replay_attempts, 2);

    harness.channel.clear_user_failures();
    let report = harness.dispatcher.drain().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(harness.channel.delivered_users(), vec!["u1"]);

    let outcome = harness
        .dispatcher
        .dispatch_outcome(DispatchRequest::new("u1", ActionType::ProfileCompleted))
        .await;
    assert_eq!(
        outcome,
        DispatchOutcome::Throttled,
        "The successful replay opens a normal window"
    );

    Ok(())
}

/// Test: Only one drain runs at a time
#[tokio::test(start_paused = true)]
async fn test_concurrent_drains_are_single_flight() -> Result<()> {
    let harness = Harness::not_ready();
    harness.grant_primary("u1", Some("+15550001")).await;
    defer(&harness, "u1", ActionType::ProfileCompleted).await?;

    harness.channel.set_ready(true);
    harness.channel.set_delay(Duration::from_millis(500));

    let (first, second) = tokio::join!(harness.dispatcher.drain(), harness.dispatcher.drain());

    let reports = [first, second];
    let skipped = reports.iter().filter(|r| r.skipped).count();
    let delivered: usize = reports.iter().map(|r| r.delivered).sum();

    assert_eq!(skipped, 1);
    assert_eq!(delivered, 1);
    assert_eq!(harness.channel.attempt_count(), 1);
    assert!(!harness.dispatcher.replay_queue().is_draining());

    Ok(())
}

/// Test: Draining while the channel is still down leaves the queue untouched
#[tokio::test]
async fn test_drain_halts_when_channel_not_ready() -> Result<()> {
    let harness = Harness::not_ready();
    defer(&harness, "u1", ActionType::UserSignup).await?;

    let report = harness.dispatcher.drain().await;

    assert_eq!(
        report,
        DrainReport {
            halted: true,
            remaining: 1,
            ..Default::default()
        }
    );
    assert_eq!(harness.channel.attempt_count(), 0);

    Ok(())
}

/// Test: A full queue discards its oldest item and logs it as failed
#[tokio::test]
async fn test_overflow_discards_oldest() -> Result<()> {
    let settings = DispatcherSettings {
        replay_queue_capacity: 2,
        ..test_settings()
    };
    let harness = Harness::with(FakeChannel::not_ready(), settings);

    for user in ["first", "second", "third"] {
        defer(&harness, user, ActionType::UserSignup).await?;
    }

    let queued = harness.dispatcher.replay_queue().snapshot().await;
    let users: Vec<_> = queued.iter().map(|i| i.request.user_id.as_str()).collect();
    assert_eq!(users, vec!["second", "third"]);

    let discarded: Vec<_> = harness
        .log
        .entries()
        .await
        .into_iter()
        .filter(|e| e.status == DeliveryStatus::Failed)
        .collect();
    assert_eq!(discarded.len(), 1);
    assert_eq!(discarded[0].user_id.as_deref(), Some("first"));
    assert_eq!(
        discarded[0].error_message.as_deref(),
        Some("discarded: replay queue full")
    );

    Ok(())
}

/// Test: Overflow during a replay never discards the item being sent
#[tokio::test(start_paused = true)]
async fn test_overflow_spares_item_in_flight() -> Result<()> {
    let settings = DispatcherSettings {
        replay_queue_capacity: 2,
        ..test_settings()
    };
    let harness = Harness::with(FakeChannel::not_ready(), settings);

    for user in ["ua", "ub"] {
        harness.grant_primary(user, Some("+15550000")).await;
        defer(&harness, user, ActionType::ProfileCompleted).await?;
    }

    harness.channel.set_ready(true);
    harness.channel.set_delay(Duration::from_millis(500));

    let dispatcher = Arc::clone(&harness.dispatcher);
    let drain = tokio::spawn(async move { dispatcher.drain().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.channel.set_ready(false);
    defer(&harness, "uc", ActionType::ProfileCompleted).await?;

    let report = drain.await?;
    assert_eq!(report.delivered, 1);
    assert!(report.halted);
    assert_eq!(report.remaining, 1);
    assert_eq!(harness.channel.delivered_users(), vec!["ua"]);

    let queued = harness.dispatcher.replay_queue().snapshot().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].request.user_id, "uc");

    let entries = harness.log.entries().await;
    let for_user = |user: &str| -> Vec<DeliveryStatus> {
        entries
            .iter()
            .filter(|e| e.user_id.as_deref() == Some(user))
            .map(|e| e.status)
            .collect()
    };
    assert_eq!(
        for_user("ua"),
        vec![DeliveryStatus::Queued, DeliveryStatus::Success]
    );
    assert_eq!(
        for_user("ub"),
        vec![DeliveryStatus::Queued, DeliveryStatus::Failed]
    );

    Ok(())
}

/// Test: Items older than the TTL are dropped at replay time
#[tokio::test(start_paused = true)]
async fn test_expired_items_are_dropped() -> Result<()> {
    let settings = DispatcherSettings {
        replay_item_ttl: Duration::from_secs(60),
        ..test_settings()
    };
    let harness = Harness::with(FakeChannel::not_ready(), settings);

    defer(&harness, "stale", ActionType::UserSignup).await?;
    tokio::time::advance(Duration::from_secs(61)).await;
    defer(&harness, "fresh", ActionType::UserSignup).await?;

    harness.channel.set_ready(true);
    let report = harness.dispatcher.drain().await;

    assert_eq!(report.expired, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(harness.channel.attempted_users(), vec!["fresh"]);

    let expired = harness
        .log
        .entries()
        .await
        .into_iter()
        .find(|e| e.status == DeliveryStatus::Failed)
        .expect("expired item is logged");
    assert_eq!(expired.user_id.as_deref(), Some("stale"));
    assert_eq!(
        expired.error_message.as_deref(),
        Some("discarded: expired in replay queue")
    );

    Ok(())
}

/// Test: Consent withdrawn while queued suppresses the replay
#[tokio::test]
async fn test_consent_checked_again_at_replay() -> Result<()> {
    let harness = Harness::not_ready();
    harness.grant_primary("u1", Some("+15550001")).await;
    defer(&harness, "u1", ActionType::ProfileCompleted).await?;

    harness.consent.remove("u1").await;
    harness.channel.set_ready(true);

    let report = harness.dispatcher.drain().await;

    assert_eq!(report.suppressed, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 0);
    assert_eq!(harness.channel.attempt_count(), 0);

    Ok(())
}

/// Test: Duplicates queued inside one throttle window replay only once
#[tokio::test]
async fn test_duplicate_queued_dispatches_are_throttled_at_replay() -> Result<()> {
    let harness = Harness::not_ready();
    defer(&harness, "u1", ActionType::UserSignup).await?;
    defer(&harness, "u1", ActionType::UserSignup).await?;

    harness.channel.set_ready(true);
    let report = harness.dispatcher.drain().await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.suppressed, 1);
    assert_eq!(harness.channel.attempt_count(), 1);

    Ok(())
}

/// Test: Manual replay request wakes the background task
#[tokio::test(start_paused = true)]
async fn test_request_drain_wakes_background_task() -> Result<()> {
    let settings = DispatcherSettings {
        replay_interval: Duration::from_secs(3600),
        ..test_settings()
    };
    let harness = Harness::with(FakeChannel::not_ready(), settings);
    defer(&harness, "u1", ActionType::UserSignup).await?;

    harness.dispatcher.start().await;
    // Let the immediate first tick pass while the channel is still down.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.dispatcher.queue_depth().await, 1);

    harness.channel.set_ready(true);
    harness.dispatcher.request_drain();

    for _ in 0..50 {
        if harness.dispatcher.queue_depth().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    harness.dispatcher.shutdown().await;

    assert_eq!(harness.dispatcher.queue_depth().await, 0);
    assert_eq!(harness.channel.delivered_users(), vec!["u1"]);

    Ok(())
}

/// Test: Queue hands out increasing sequence numbers and removes only the head
#[tokio::test]
async fn test_queue_head_removal_by_sequence() -> Result<()> {
    let queue = ReplayQueue::new(10, Duration::ZERO);

    for user in ["a", "b"] {
        let request = DispatchRequest::new(user, ActionType::UserSignup).validate()?;
        assert!(queue.enqueue(request).await.is_none());
    }

    let items = queue.snapshot().await;
    assert!(items[0].seq < items[1].seq);

    assert!(!queue.remove_if_head(items[1].seq).await, "Not the head");
    assert!(queue.remove_if_head(items[0].seq).await);
    assert!(!queue.remove_if_head(items[0].seq).await, "Already removed");
    assert_eq!(queue.len().await, 1);

    let attempted_at = tokio::time::Instant::now();
    queue.record_failed_attempt(items[1].seq, attempted_at).await;
    let head = queue.front().await.expect("one item left");
    assert_eq!(head.replay_attempts, 1);
    assert_eq!(head.last_attempt, Some(attempted_at));
    assert!(!queue.is_expired(&head), "Zero TTL never expires");

    Ok(())
}

/// Test: A full queue discards past a claimed head, or the new item if alone
#[tokio::test]
async fn test_overflow_skips_claimed_head() -> Result<()> {
    let queue = ReplayQueue::new(2, Duration::ZERO);
    let request = |user: &str| DispatchRequest::new(user, ActionType::UserSignup).validate();

    queue.enqueue(request("a")?).await;
    queue.enqueue(request("b")?).await;

    let _guard = queue.try_begin_drain();
    let head = queue.claim_front().await.expect("head");
    assert_eq!(head.request.user_id, "a");

    let discarded = queue.enqueue(request("c")?).await.expect("queue was full");
    assert_eq!(discarded.request.user_id, "b");

    let users: Vec<_> = queue
        .snapshot()
        .await
        .into_iter()
        .map(|i| i.request.user_id)
        .collect();
    assert_eq!(users, vec!["a", "c"]);

    let single = ReplayQueue::new(1, Duration::ZERO);
    single.enqueue(request("a")?).await;
    single.claim_front().await;

    let discarded = single.enqueue(request("b")?).await.expect("queue was full");
    assert_eq!(discarded.request.user_id, "b", "The new item is dropped instead");
    assert_eq!(single.front().await.map(|i| i.request.user_id), Some("a".to_string()));

    Ok(())
}

/// Test: The drain guard releases the slot when dropped
#[test]
fn test_drain_guard_releases_on_drop() {
    let queue = ReplayQueue::new(1, Duration::ZERO);

    let guard = queue.try_begin_drain();
    assert!(guard.is_some());
    assert!(queue.is_draining());
    assert!(queue.try_begin_drain().is_none());

    drop(guard);
    assert!(!queue.is_draining());
    assert!(queue.try_begin_drain().is_some());
}
