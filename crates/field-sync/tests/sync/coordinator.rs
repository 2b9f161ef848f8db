//! SyncCoordinator tests. Time is paused, so backoff and periodic timers
//! advance deterministically when the runtime is idle.

use field_sync::config::FieldSyncConfig;
use field_sync::error::RemoteError;
use field_sync::sync::{EnqueueEffect, PushOutcome, SyncEvent};
use field_sync::types::SyncStatus;

use crate::common::{advance, key, user, Behavior, Harness};

// ============================================================================
// Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn retryable_failures_are_retried_until_acknowledged() {
    let h = Harness::new();
    h.remote
        .fail_next_upserts(2, RemoteError::unavailable("503 service unavailable"));

    h.put_and_enqueue("bio", "hello");
    // Attempts at 0s, 1s (backoff 1s) and 3s (backoff 2s).
    advance(5_000).await;

    assert_eq!(h.remote.upserted_values("bio"), vec!["hello"; 3]);
    assert_eq!(h.remote.value("bio").as_deref(), Some("hello"));
    assert!(!h.is_dirty("bio"));
    assert_eq!(h.coordinator.status(&key("bio")), Some(SyncStatus::Synced));
}

#[tokio::test(start_paused = true)]
async fn status_is_offline_while_waiting_for_retry() {
    let h = Harness::new();
    h.remote
        .fail_next_upserts(1, RemoteError::timeout("gateway timeout"));

    h.put_and_enqueue("bio", "hello");
    advance(100).await;

    assert_eq!(h.coordinator.status(&key("bio")), Some(SyncStatus::Offline));
    assert!(h.is_dirty("bio"));
    assert_eq!(h.coordinator.pending_count(), 1);

    advance(1_500).await;
    assert_eq!(h.coordinator.status(&key("bio")), Some(SyncStatus::Synced));
}

#[tokio::test(start_paused = true)]
async fn hanging_upsert_times_out_and_is_retried() {
    let config = FieldSyncConfig {
        request_timeout_ms: 2_000,
        ..FieldSyncConfig::default()
    };
    let h = Harness::builder().config(config).build();
    h.remote.set_upsert(Behavior::Hang);

    h.put_and_enqueue("bio", "hello");
    advance(2_500).await;
    assert_eq!(h.coordinator.status(&key("bio")), Some(SyncStatus::Offline));

    h.remote.set_upsert(Behavior::Ok);
    advance(1_000).await;

    assert_eq!(h.remote.upserted_values("bio").len(), 2);
    assert_eq!(h.remote.value("bio").as_deref(), Some("hello"));
    assert_eq!(h.coordinator.status(&key("bio")), Some(SyncStatus::Synced));
}

// ============================================================================
// Superseding
// ============================================================================

#[tokio::test(start_paused = true)]
async fn newer_value_supersedes_queued_one_behind_in_flight_push() {
    let h = Harness::new();
    h.remote
        .set_upsert(Behavior::Delay(std::time::Duration::from_secs(1)));

    h.put_and_enqueue("bio", "a");
    advance(10).await;
    assert_eq!(h.coordinator.in_flight_count(), 1);

    let b = h.store.put(&key("bio"), "b", "profile").unwrap();
    assert_eq!(h.coordinator.enqueue(&b), EnqueueEffect::Queued);
    let c = h.store.put(&key("bio"), "c", "profile").unwrap();
    assert_eq!(h.coordinator.enqueue(&c), EnqueueEffect::Superseded);

    advance(5_000).await;

    assert_eq!(h.remote.upserted_values("bio"), vec!["a", "c"]);
    assert_eq!(h.remote.value("bio").as_deref(), Some("c"));
    assert!(!h.is_dirty("bio"));
}

#[tokio::test(start_paused = true)]
async fn two_enqueues_before_the_push_starts_write_once() {
    let h = Harness::new();

    h.put_and_enqueue("bio", "v1");
    h.put_and_enqueue("bio", "v2");
    advance(1_000).await;

    assert_eq!(h.remote.upserted_values("bio"), vec!["v2"]);
    assert!(!h.is_dirty("bio"));
}

#[tokio::test(start_paused = true)]
async fn stale_value_is_ignored() {
    let h = Harness::new();
    h.remote
        .set_upsert(Behavior::Delay(std::time::Duration::from_secs(1)));

    let new = h.store.put(&key("bio"), "new", "profile").unwrap();
    let mut old = new.clone();
    old.value = "old".to_string();
    old.last_modified_at = new.last_modified_at - chrono::Duration::seconds(1);

    h.coordinator.enqueue(&new);
    assert_eq!(h.coordinator.enqueue(&old), EnqueueEffect::Stale);

    advance(2_000).await;
    assert_eq!(h.remote.upserted_values("bio"), vec!["new"]);
}

#[tokio::test(start_paused = true)]
async fn ack_for_superseded_value_keeps_entry_dirty() {
    let h = Harness::new();
    h.remote
        .set_upsert(Behavior::Delay(std::time::Duration::from_secs(1)));

    h.put_and_enqueue("bio", "first");
    advance(10).await;
    // Written locally while "first" is in flight, but not enqueued.
    h.store.put(&key("bio"), "second", "profile").unwrap();
    advance(1_500).await;

    assert_eq!(h.remote.value("bio").as_deref(), Some("first"));
    assert!(h.is_dirty("bio"), "snapshot guard rejects the stale ack");
}

// ============================================================================
// Offline
// ============================================================================

#[tokio::test(start_paused = true)]
async fn offline_writes_queue_and_flush_on_reconnect() {
    let h = Harness::builder().offline().build();
    let fields = ["a", "b", "c", "d", "e"];

    for field in fields {
        h.put_and_enqueue(field, &format!("value-{field}"));
    }
    advance(1_000).await;

    assert!(h.remote.upserts().is_empty());
    assert_eq!(h.coordinator.pending_count(), fields.len());
    for field in fields {
        assert_eq!(h.coordinator.status(&key(field)), Some(SyncStatus::Offline));
    }

    h.connectivity.set_online();
    advance(100).await;

    assert_eq!(h.remote.upserts().len(), fields.len());
    for field in fields {
        assert_eq!(h.remote.value(field), Some(format!("value-{field}")));
        assert_eq!(h.coordinator.status(&key(field)), Some(SyncStatus::Synced));
    }
    assert!(h.store.dirty_entries(&user()).unwrap().is_empty());
    assert!(h
        .events
        .lock()
        .iter()
        .any(|e| matches!(e, SyncEvent::ConnectivityChanged(c) if c.is_online())));
}

#[tokio::test(start_paused = true)]
async fn going_offline_marks_queued_keys_offline() {
    let h = Harness::new();
    h.remote.set_upsert(Behavior::Unavailable);

    h.put_and_enqueue("bio", "hello");
    advance(10).await;
    h.connectivity.set_offline();
    advance(10).await;

    assert!(!h.coordinator.is_online());
    assert_eq!(h.coordinator.status(&key("bio")), Some(SyncStatus::Offline));
}

#[tokio::test(start_paused = true)]
async fn periodic_sync_retries_failed_push() {
    // Backoff longer than the sync interval: only the periodic pass retries.
    let config = FieldSyncConfig {
        retry_base_delay_ms: 120_000,
        retry_max_delay_ms: 120_000,
        ..FieldSyncConfig::default()
    };
    let h = Harness::builder().config(config).build();
    h.remote
        .fail_next_upserts(1, RemoteError::unavailable("network unreachable"));

    h.put_and_enqueue("avatar_name", "Neo");
    advance(20_000).await;
    assert_eq!(
        h.coordinator.status(&key("avatar_name")),
        Some(SyncStatus::Offline)
    );
    assert_eq!(h.remote.upserts().len(), 1);

    advance(11_000).await;
    assert_eq!(h.remote.upserts().len(), 2);
    assert_eq!(h.remote.value("avatar_name").as_deref(), Some("Neo"));
    assert_eq!(
        h.coordinator.status(&key("avatar_name")),
        Some(SyncStatus::Synced)
    );
    assert!(h
        .events
        .lock()
        .iter()
        .any(|e| matches!(e, SyncEvent::PeriodicSync { enqueued: 1, .. })));
}

#[tokio::test(start_paused = true)]
async fn periodic_sync_pushes_entries_written_without_enqueue() {
    let h = Harness::new();
    h.store.put(&key("bio"), "written earlier", "profile").unwrap();

    advance(31_000).await;
    assert_eq!(h.remote.value("bio").as_deref(), Some("written earlier"));
    assert!(!h.is_dirty("bio"));
}

// ============================================================================
// Rejection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn rejected_value_is_not_retried() {
    let h = Harness::new();
    h.remote.set_upsert(Behavior::Reject);

    h.put_and_enqueue("bio", "forbidden words");
    advance(100).await;
    assert_eq!(h.coordinator.status(&key("bio")), Some(SyncStatus::Rejected));
    assert!(h.is_dirty("bio"));

    // Two periodic passes later the same value has still been sent once.
    advance(65_000).await;
    assert_eq!(h.remote.upserts().len(), 1);
    assert_eq!(h.coordinator.status(&key("bio")), Some(SyncStatus::Rejected));

    h.remote.set_upsert(Behavior::Ok);
    h.put_and_enqueue("bio", "kind words");
    advance(100).await;
    assert_eq!(h.remote.value("bio").as_deref(), Some("kind words"));
    assert_eq!(h.coordinator.status(&key("bio")), Some(SyncStatus::Synced));
}

// ============================================================================
// sync_all
// ============================================================================

#[tokio::test(start_paused = true)]
async fn sync_all_reports_each_field_independently() {
    let h = Harness::new();
    h.remote.reject_field("b");
    for field in ["a", "b", "c"] {
        h.store.put(&key(field), "v", "profile").unwrap();
    }

    let report = h.coordinator.sync_all(&user()).await;

    assert_eq!(report.attempted, 3);
    assert_eq!(report.pushed, 2);
    assert_eq!(report.rejected, 1);
    assert!(matches!(
        report.outcomes.get("b"),
        Some(PushOutcome::Rejected { .. })
    ));
    assert!(!report.is_clean());
    assert_eq!(h.remote.value("a").as_deref(), Some("v"));
    assert_eq!(h.remote.value("c").as_deref(), Some("v"));

    // The refused value is reported again without another request.
    let again = h.coordinator.sync_all(&user()).await;
    assert_eq!(again.attempted, 1);
    assert_eq!(again.rejected, 1);
    assert_eq!(h.remote.upserted_values("b").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sync_all_while_offline_defers_everything() {
    let h = Harness::builder().offline().build();
    for field in ["a", "b"] {
        h.store.put(&key(field), "v", "profile").unwrap();
    }

    let report = h.coordinator.sync_all(&user()).await;

    assert_eq!(report.attempted, 2);
    assert_eq!(report.deferred, 2);
    assert!(h.remote.upserts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn sync_all_with_nothing_dirty_is_clean() {
    let h = Harness::new();
    let report = h.coordinator.sync_all(&user()).await;
    assert_eq!(report.attempted, 0);
    assert!(report.is_clean());
}

// ============================================================================
// Pull / cancel / shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn pull_returns_remote_value_and_emits_event() {
    let h = Harness::new();
    h.remote.seed("bio", "from server");

    let pulled = h.coordinator.pull(&key("bio")).await.unwrap();
    assert_eq!(pulled.as_deref(), Some("from server"));
    assert!(h
        .events
        .lock()
        .iter()
        .any(|e| matches!(e, SyncEvent::Pulled { found: true, .. })));
}

#[tokio::test(start_paused = true)]
async fn pull_while_offline_fails_without_calling_remote() {
    let h = Harness::builder().offline().build();
    let err = h.coordinator.pull(&key("bio")).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.remote.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_pending_withdraws_queued_push() {
    let h = Harness::builder().offline().build();
    h.put_and_enqueue("bio", "draft");

    assert!(h.coordinator.cancel_pending(&key("bio")));
    assert_eq!(h.coordinator.pending_count(), 0);

    h.connectivity.set_online();
    advance(100).await;
    // Online transition re-scans dirty entries, so the value still syncs.
    assert_eq!(h.remote.value("bio").as_deref(), Some("draft"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_unpushed_values_dirty() {
    let h = Harness::builder().offline().build();
    h.put_and_enqueue("bio", "unsent");

    h.coordinator.shutdown().await;

    assert!(h.is_dirty("bio"));
    assert!(h.coordinator.pull(&key("bio")).await.is_err());
}
