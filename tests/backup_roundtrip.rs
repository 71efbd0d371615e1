//! Backup round-trip tests
//!
//! End-to-end coverage of the backup artifact path:
//! - Export -> artifact -> restore preserves exact graph contents
//! - A backup taken before data loss brings the lost data back
//! - A corrupt artifact is caught by validation and blocks restore
//!   before any target instance is touched

use std::sync::Arc;
use std::time::Duration;

use graphvault::audit::MemoryAuditLog;
use graphvault::backup::{BackupError, BackupManager, BackupStatus, RecoveryPin};
use graphvault::engine::{seed_ring, GraphEngine, MemoryGraph, PRODUCTION_INSTANCE};
use graphvault::health::{CheckTimeouts, HealthChecker};
use graphvault::recovery::{RecoveryError, RecoveryStateMachine, RecoveryStatus};
use tempfile::TempDir;

struct Stack {
    _dir: TempDir,
    engine: Arc<MemoryGraph>,
    backups: Arc<BackupManager>,
    recovery: RecoveryStateMachine,
}

fn stack(nodes: u64, rels: u64) -> Stack {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MemoryGraph::new());
    seed_ring(&engine, PRODUCTION_INSTANCE, nodes, rels);
    let audit = Arc::new(MemoryAuditLog::new());
    let pin = Arc::new(RecoveryPin::new());
    let backups = Arc::new(
        BackupManager::new(
            engine.clone(),
            audit.clone(),
            pin.clone(),
            dir.path().join("backups"),
            true,
            "roundtrip-tests",
        )
        .unwrap(),
    );
    let health = Arc::new(HealthChecker::new(
        engine.clone(),
        audit.clone(),
        CheckTimeouts::default(),
        "roundtrip-tests",
    ));
    let recovery = RecoveryStateMachine::new(
        engine.clone(),
        backups.clone(),
        health,
        audit,
        pin,
        "roundtrip-tests",
    );
    Stack {
        _dir: dir,
        engine,
        backups,
        recovery,
    }
}

const T: Duration = Duration::from_secs(5);

// =============================================================================
// Round Trip
// =============================================================================

/// A restore reproduces the exact node and relationship counts that were
/// exported, and the record's statistics agree with both.
#[test]
fn test_backup_restore_preserves_counts() {
    let s = stack(120, 240);

    let record = s.backups.create(Some("full")).unwrap();
    assert_eq!(record.node_count, 120);
    assert_eq!(record.relationship_count, 240);

    let state = s.recovery.restore("full", "restore-full", true).unwrap();
    assert_eq!(state.status, RecoveryStatus::RecoverySuccess);

    let stats = s.engine.stats("restore-full", T).unwrap();
    assert_eq!(stats.node_count, 120);
    assert_eq!(stats.relationship_count, 240);
    assert_eq!(stats.nodes_by_label.get("Person"), Some(&120));
}

/// Data deleted after a backup comes back when that backup is restored
/// and promoted.
#[test]
fn test_restore_recovers_lost_data() {
    let s = stack(50, 50);
    s.backups.create(Some("before-loss")).unwrap();

    // An ungoverned write path deletes a third of the graph.
    for id in 0..17 {
        s.engine.remove_node(PRODUCTION_INSTANCE, id);
    }
    assert_eq!(s.engine.stats(PRODUCTION_INSTANCE, T).unwrap().node_count, 33);

    s.recovery
        .restore("before-loss", "restore-before-loss", false)
        .unwrap();
    s.recovery.promote_to_production().unwrap();

    let serving = s.engine.serving_instance();
    assert_eq!(serving, "restore-before-loss");
    assert_eq!(s.engine.stats(&serving, T).unwrap().node_count, 50);
}

/// Compression does not change what a restore produces.
#[test]
fn test_uncompressed_backup_restores_identically() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MemoryGraph::new());
    seed_ring(&engine, PRODUCTION_INSTANCE, 30, 60);
    let audit = Arc::new(MemoryAuditLog::new());
    let pin = Arc::new(RecoveryPin::new());
    let backups = Arc::new(
        BackupManager::new(
            engine.clone(),
            audit.clone(),
            pin.clone(),
            dir.path().join("backups"),
            false,
            "roundtrip-tests",
        )
        .unwrap(),
    );
    let health = Arc::new(HealthChecker::new(
        engine.clone(),
        audit.clone(),
        CheckTimeouts::default(),
        "roundtrip-tests",
    ));
    let recovery =
        RecoveryStateMachine::new(engine.clone(), backups.clone(), health, audit, pin, "roundtrip-tests");

    let record = backups.create(Some("plain")).unwrap();
    assert!(record.artifact_path.to_string_lossy().ends_with(".tar"));

    recovery.restore("plain", "restore-plain", true).unwrap();
    assert_eq!(engine.stats("restore-plain", T).unwrap().node_count, 30);
}

// =============================================================================
// Corruption
// =============================================================================

/// Flipping bytes in the artifact fails validation, and a restore of the
/// corrupt backup is rejected before any target instance exists.
#[test]
fn test_corrupt_artifact_blocks_restore() {
    let s = stack(40, 40);
    let record = s.backups.create(Some("victim")).unwrap();

    let mut bytes = std::fs::read(&record.artifact_path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    std::fs::write(&record.artifact_path, &bytes).unwrap();

    assert!(!s.backups.validate("victim").unwrap());

    let err = s
        .recovery
        .restore("victim", "restore-victim", true)
        .unwrap_err();
    assert!(matches!(err, RecoveryError::BackupCorrupt(_)));
    assert!(!s.engine.has_instance("restore-victim"));
    assert_eq!(
        s.recovery.snapshot().unwrap().status,
        RecoveryStatus::NotRecovering
    );
}

/// The stored checksum survives a failed validation untouched; the next
/// validation still compares against the original digest.
#[test]
fn test_corruption_never_rewrites_the_stored_checksum() {
    let s = stack(10, 10);
    let record = s.backups.create(Some("b1")).unwrap();
    let original = record.checksum.clone();

    std::fs::write(&record.artifact_path, b"other bytes").unwrap();
    assert!(!s.backups.validate("b1").unwrap());
    assert!(!s.backups.validate("b1").unwrap());

    assert_eq!(s.backups.get("b1").unwrap().checksum, original);
}

// =============================================================================
// Resource Exhaustion
// =============================================================================

/// A full disk during export surfaces as storage exhaustion, leaves a
/// FAILED record behind, and cleans up every partial file.
#[test]
fn test_full_disk_aborts_cleanly() {
    let s = stack(30, 30);
    s.engine.set_export_disk_full(true);

    let err = s.backups.create(Some("b1")).unwrap_err();
    assert!(matches!(err, BackupError::StorageExhausted { .. }));

    let record = s.backups.get("b1").unwrap();
    assert_eq!(record.status, BackupStatus::Failed);
    assert!(!record.artifact_path.exists());

    let leftovers: Vec<String> = std::fs::read_dir(s.backups.storage_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".partial") || name.ends_with(".export"))
        .collect();
    assert!(leftovers.is_empty());

    // Once space is freed the next attempt succeeds.
    s.engine.set_export_disk_full(false);
    let record = s.backups.create(Some("b2")).unwrap();
    assert_eq!(record.status, BackupStatus::Complete);
}

// =============================================================================
// Lifecycle
// =============================================================================

/// A freshly created backup is COMPLETE; validation advances it to
/// VALIDATED; deletion removes both files.
#[test]
fn test_backup_lifecycle_on_disk() {
    let s = stack(10, 10);
    let record = s.backups.create(Some("b1")).unwrap();
    assert_eq!(record.status, BackupStatus::Complete);

    s.backups.validate("b1").unwrap();
    assert_eq!(s.backups.get("b1").unwrap().status, BackupStatus::Validated);

    s.backups.delete("b1").unwrap();
    assert!(!record.artifact_path.exists());
    assert!(s.backups.list().unwrap().is_empty());
}

/// Backups are read-only against the live graph: creating one never
/// changes the serving instance's contents.
#[test]
fn test_backup_leaves_production_untouched() {
    let s = stack(25, 25);
    let before = s.engine.stats(PRODUCTION_INSTANCE, T).unwrap();

    s.backups.create(Some("b1")).unwrap();
    s.backups.validate("b1").unwrap();

    let after = s.engine.stats(PRODUCTION_INSTANCE, T).unwrap();
    assert_eq!(before, after);
}
