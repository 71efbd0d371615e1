//! Retention and pruning tests
//!
//! - Tier quotas count backups, not days: the newest N per tier survive
//!   pruning regardless of expiry
//! - The most recent usable backup is never deleted
//! - A backup pinned by an in-flight recovery is never deleted
//! - Scheduled runs retry transient failures with backoff and alert when
//!   retries are exhausted

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use graphvault::audit::MemoryAuditLog;
use graphvault::backup::{BackupError, BackupManager, RecoveryPin};
use graphvault::engine::{seed_ring, MemoryGraph, PRODUCTION_INSTANCE};
use graphvault::retention::{
    BackoffPolicy, MemoryAlertSink, RetentionError, RetentionPolicy, RetentionScheduler,
};
use tempfile::TempDir;

struct Stack {
    _dir: TempDir,
    engine: Arc<MemoryGraph>,
    backups: Arc<BackupManager>,
    pin: Arc<RecoveryPin>,
    alerts: Arc<MemoryAlertSink>,
}

fn stack() -> Stack {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MemoryGraph::new());
    seed_ring(&engine, PRODUCTION_INSTANCE, 10, 10);
    let pin = Arc::new(RecoveryPin::new());
    let backups = Arc::new(
        BackupManager::new(
            engine.clone(),
            Arc::new(MemoryAuditLog::new()),
            pin.clone(),
            dir.path().join("backups"),
            true,
            "retention-tests",
        )
        .unwrap(),
    );
    Stack {
        _dir: dir,
        engine,
        backups,
        pin,
        alerts: Arc::new(MemoryAlertSink::new()),
    }
}

fn tagged(tag: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    tags.insert(tag.to_string());
    tags
}

fn expired() -> Option<chrono::DateTime<Utc>> {
    Some(Utc::now() - Duration::days(1))
}

// =============================================================================
// Tier Quotas
// =============================================================================

/// Ten expired daily backups under keep_daily=7: the seven newest stay,
/// the three oldest go.
#[test]
fn test_daily_quota_keeps_newest_seven() {
    let s = stack();
    for i in 0..10 {
        s.backups
            .create_with(Some(&format!("daily-{:02}", i)), tagged("daily"), expired())
            .unwrap();
    }

    let policy = RetentionPolicy::default();
    let deleted = s.backups.prune(&policy).unwrap();
    assert_eq!(deleted, 3);

    let survivors: Vec<String> = s.backups.list().unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(survivors.len(), 7);
    // Newest first; daily-00..02 were created earliest and are gone.
    assert!(!survivors.iter().any(|id| id.as_str() <= "daily-02"));
    assert!(survivors.contains(&"daily-09".to_string()));
}

/// Daily and weekly quotas fill independently.
#[test]
fn test_tiers_are_counted_separately() {
    let s = stack();
    for i in 0..6 {
        s.backups
            .create_with(Some(&format!("w-{}", i)), tagged("weekly"), expired())
            .unwrap();
    }
    for i in 0..8 {
        s.backups
            .create_with(Some(&format!("d-{}", i)), tagged("daily"), expired())
            .unwrap();
    }

    let deleted = s.backups.prune(&RetentionPolicy::default()).unwrap();
    // 6 weekly - 4 kept = 2; 8 daily - 7 kept = 1
    assert_eq!(deleted, 3);

    let records = s.backups.list().unwrap();
    let weekly = records.iter().filter(|r| r.tags.contains("weekly")).count();
    let daily = records.iter().filter(|r| r.tags.contains("daily")).count();
    assert_eq!(weekly, 4);
    assert_eq!(daily, 7);
}

/// An unexpired backup is kept even when it holds no tier slot.
#[test]
fn test_unexpired_backups_are_untouchable() {
    let s = stack();
    s.backups
        .create_with(
            Some("young"),
            BTreeSet::new(),
            Some(Utc::now() + Duration::days(3)),
        )
        .unwrap();
    s.backups
        .create_with(Some("newer"), tagged("daily"), None)
        .unwrap();

    assert_eq!(s.backups.prune(&RetentionPolicy::default()).unwrap(), 0);
    assert!(s.backups.get("young").is_ok());
}

// =============================================================================
// Floor and Pin
// =============================================================================

/// Even fully expired and over quota, the single most recent usable
/// backup survives: retention never deletes the last line of defense.
#[test]
fn test_most_recent_backup_is_never_pruned() {
    let s = stack();
    let policy = RetentionPolicy {
        keep_daily: 0,
        keep_weekly: 0,
        ..RetentionPolicy::default()
    };

    s.backups
        .create_with(Some("older"), BTreeSet::new(), expired())
        .unwrap();
    s.backups
        .create_with(Some("newest"), BTreeSet::new(), expired())
        .unwrap();

    let deleted = s.backups.prune(&policy).unwrap();
    assert_eq!(deleted, 1);

    let survivors: Vec<String> = s.backups.list().unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(survivors, vec!["newest".to_string()]);
}

/// A pinned backup survives pruning even when expired and over quota.
#[test]
fn test_pinned_backup_survives_pruning() {
    let s = stack();
    let policy = RetentionPolicy {
        keep_daily: 0,
        keep_weekly: 0,
        ..RetentionPolicy::default()
    };

    s.backups
        .create_with(Some("pinned"), BTreeSet::new(), expired())
        .unwrap();
    s.backups
        .create_with(Some("floor"), BTreeSet::new(), expired())
        .unwrap();
    s.pin.pin("pinned");

    assert_eq!(s.backups.prune(&policy).unwrap(), 0);
    assert!(s.backups.get("pinned").is_ok());

    s.pin.clear();
    assert_eq!(s.backups.prune(&policy).unwrap(), 1);
    assert!(matches!(
        s.backups.get("pinned"),
        Err(BackupError::UnknownBackup(_))
    ));
}

/// Failed backups hold no tier slot; their metadata is pruned once
/// expired without counting against the quota.
#[test]
fn test_failed_backups_hold_no_slot() {
    let s = stack();
    s.engine.set_export_failure(Some("flaky disk"));
    let _ = s.backups.create_with(Some("bad"), tagged("daily"), expired());
    s.engine.set_export_failure(None);
    s.backups
        .create_with(Some("good"), tagged("daily"), expired())
        .unwrap();

    assert_eq!(s.backups.prune(&RetentionPolicy::default()).unwrap(), 1);
    assert!(s.backups.get("bad").is_err());
    assert!(s.backups.get("good").is_ok());
}

// =============================================================================
// Scheduled Runs
// =============================================================================

/// A scheduled run that keeps failing retries under the backoff policy,
/// then alerts with the consecutive-failure count.
#[test]
fn test_exhausted_run_alerts_with_streak() {
    let s = stack();
    let scheduler = RetentionScheduler::new(
        s.backups.clone(),
        RetentionPolicy::default(),
        BackoffPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            multiplier: 1.0,
        },
        "0 3 * * *",
        s.alerts.clone(),
    )
    .unwrap();

    s.engine.set_export_failure(Some("engine offline"));
    for _ in 0..3 {
        let err = scheduler.run_once(Utc::now()).unwrap_err();
        assert!(matches!(err, RetentionError::AttemptsExhausted { .. }));
    }

    let raised = s.alerts.raised();
    assert_eq!(raised.len(), 3);
    assert_eq!(raised[2].consecutive_failures, 3);

    // Recovery clears the streak and the next alert starts over.
    s.engine.set_export_failure(None);
    scheduler.run_once(Utc::now()).unwrap();
    assert_eq!(scheduler.failure_streak(), 0);
}

/// A transient outage shorter than the retry budget produces a backup
/// and no alert.
#[test]
fn test_transient_outage_is_absorbed() {
    let s = stack();
    let scheduler = RetentionScheduler::new(
        s.backups.clone(),
        RetentionPolicy::default(),
        BackoffPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            multiplier: 1.0,
        },
        "0 3 * * *",
        s.alerts.clone(),
    )
    .unwrap();

    s.engine.set_export_failures_remaining("engine restarting", 2);
    let record = scheduler.run_once(Utc::now()).unwrap();
    assert!(record.checksum.is_some());
    assert!(s.alerts.raised().is_empty());
}
