//! Recovery state machine invariant tests
//!
//! - At most one recovery in flight; concurrent starts lose atomically
//! - Transitions are explicit and never skip phases
//! - Promotion is mutually exclusive and only legal from a successful,
//!   unpromoted recovery
//! - Reset discards the attempt and frees the machine

use std::sync::Arc;
use std::thread;

use graphvault::audit::MemoryAuditLog;
use graphvault::backup::{BackupManager, RecoveryPin};
use graphvault::engine::{seed_ring, GraphEngine, MemoryGraph, PRODUCTION_INSTANCE};
use graphvault::health::{CheckTimeouts, HealthChecker};
use graphvault::recovery::{RecoveryError, RecoveryStateMachine, RecoveryStatus};
use tempfile::TempDir;

struct Stack {
    _dir: TempDir,
    engine: Arc<MemoryGraph>,
    backups: Arc<BackupManager>,
    recovery: Arc<RecoveryStateMachine>,
}

fn stack() -> Stack {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MemoryGraph::new());
    seed_ring(&engine, PRODUCTION_INSTANCE, 30, 30);
    let audit = Arc::new(MemoryAuditLog::new());
    let pin = Arc::new(RecoveryPin::new());
    let backups = Arc::new(
        BackupManager::new(
            engine.clone(),
            audit.clone(),
            pin.clone(),
            dir.path().join("backups"),
            true,
            "invariant-tests",
        )
        .unwrap(),
    );
    let health = Arc::new(HealthChecker::new(
        engine.clone(),
        audit.clone(),
        CheckTimeouts::default(),
        "invariant-tests",
    ));
    let recovery = Arc::new(RecoveryStateMachine::new(
        engine.clone(),
        backups.clone(),
        health,
        audit,
        pin,
        "invariant-tests",
    ));
    Stack {
        _dir: dir,
        engine,
        backups,
        recovery,
    }
}

// =============================================================================
// Single Recovery In Flight
// =============================================================================

/// Eight threads race to initialize a recovery; exactly one wins, the
/// rest get AlreadyInProgress without side effects.
#[test]
fn test_concurrent_initialize_admits_exactly_one() {
    let s = stack();
    s.backups.create(Some("b1")).unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let recovery = s.recovery.clone();
        handles.push(thread::spawn(move || {
            recovery.initialize_recovery("b1", &format!("restore-{}", i))
        }));
    }

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result.as_ref().unwrap_err(),
            RecoveryError::AlreadyInProgress { .. }
        ));
    }

    let state = s.recovery.snapshot().unwrap();
    assert_eq!(state.status, RecoveryStatus::Recovering);
    assert_eq!(state.backup_id.as_deref(), Some("b1"));
}

/// A losing initialize attempt does not disturb the in-flight recovery's
/// backup id or target.
#[test]
fn test_rejected_initialize_has_no_side_effects() {
    let s = stack();
    s.backups.create(Some("b1")).unwrap();
    s.backups.create(Some("b2")).unwrap();

    s.recovery.initialize_recovery("b1", "restore-b1").unwrap();
    let before = s.recovery.snapshot().unwrap();

    let _ = s.recovery.initialize_recovery("b2", "restore-b2");
    let after = s.recovery.snapshot().unwrap();
    assert_eq!(after.backup_id, before.backup_id);
    assert_eq!(after.target_instance, before.target_instance);
}

// =============================================================================
// Transition Legality
// =============================================================================

/// Phases cannot be skipped: validation before restore, promotion before
/// success and restore without initialization are all rejected.
#[test]
fn test_phases_cannot_be_skipped() {
    let s = stack();
    s.backups.create(Some("b1")).unwrap();

    assert!(matches!(
        s.recovery.execute_restore().unwrap_err(),
        RecoveryError::InvalidState { .. }
    ));
    assert!(matches!(
        s.recovery.start_validation().unwrap_err(),
        RecoveryError::InvalidState { .. }
    ));
    assert!(matches!(
        s.recovery.promote_to_production().unwrap_err(),
        RecoveryError::InvalidState { .. }
    ));

    s.recovery.initialize_recovery("b1", "restore-b1").unwrap();
    // Still RECOVERING: promotion remains illegal until validation passes.
    assert!(matches!(
        s.recovery.promote_to_production().unwrap_err(),
        RecoveryError::InvalidState { .. }
    ));
}

/// The full legal sequence walks RECOVERING -> VALIDATION ->
/// RECOVERY_SUCCESS -> promoted NOT_RECOVERING.
#[test]
fn test_full_legal_sequence() {
    let s = stack();
    s.backups.create(Some("b1")).unwrap();

    s.recovery.initialize_recovery("b1", "restore-b1").unwrap();
    assert_eq!(s.recovery.snapshot().unwrap().status, RecoveryStatus::Recovering);

    s.recovery.execute_restore().unwrap();
    let report = s.recovery.run_validation().unwrap();
    assert!(report.is_healthy());
    assert_eq!(
        s.recovery.snapshot().unwrap().status,
        RecoveryStatus::RecoverySuccess
    );

    s.recovery.promote_to_production().unwrap();
    let state = s.recovery.snapshot().unwrap();
    assert_eq!(state.status, RecoveryStatus::NotRecovering);
    assert!(state.promoted_to_production);
    assert_eq!(s.engine.serving_instance(), "restore-b1");
}

/// Progress only moves forward and only during RECOVERING.
#[test]
fn test_progress_monotonic_and_phase_bound() {
    let s = stack();
    s.backups.create(Some("b1")).unwrap();
    s.recovery.initialize_recovery("b1", "restore-b1").unwrap();

    s.recovery.update_progress(10).unwrap();
    s.recovery.update_progress(10).unwrap();
    assert!(matches!(
        s.recovery.update_progress(5).unwrap_err(),
        RecoveryError::ProgressRegression { from: 10, to: 5 }
    ));

    s.recovery.execute_restore().unwrap();
    s.recovery.run_validation().unwrap();
    assert!(matches!(
        s.recovery.update_progress(100).unwrap_err(),
        RecoveryError::InvalidState { .. }
    ));
}

// =============================================================================
// Promotion Exclusivity
// =============================================================================

/// Once promoted, a second promotion of the same recovery is rejected and
/// the serving instance stays where the first cutover put it.
#[test]
fn test_promotion_happens_once() {
    let s = stack();
    s.backups.create(Some("b1")).unwrap();
    s.recovery.restore("b1", "restore-b1", true).unwrap();

    s.recovery.promote_to_production().unwrap();
    assert!(s.recovery.promote_to_production().is_err());
    assert_eq!(s.engine.serving_instance(), "restore-b1");
}

/// Concurrent promotion attempts on a successful recovery admit exactly
/// one cutover.
#[test]
fn test_concurrent_promotion_admits_exactly_one() {
    let s = stack();
    s.backups.create(Some("b1")).unwrap();
    s.recovery.restore("b1", "restore-b1", true).unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let recovery = s.recovery.clone();
        handles.push(thread::spawn(move || recovery.promote_to_production()));
    }
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(winners, 1);
    assert_eq!(s.engine.serving_instance(), "restore-b1");
}

// =============================================================================
// Reset
// =============================================================================

/// Reset after a failure frees the machine, clears the pin and drops the
/// half-restored target.
#[test]
fn test_reset_after_failure_frees_everything() {
    let s = stack();
    // Orphan the graph so validation fails.
    s.engine.remove_node(PRODUCTION_INSTANCE, 7);
    s.backups.create(Some("b1")).unwrap();

    let state = s.recovery.restore("b1", "restore-b1", true).unwrap();
    assert_eq!(state.status, RecoveryStatus::RecoveryFailed);

    // Pin is still held while failed; delete is refused.
    assert!(s.backups.delete("b1").is_err());

    s.recovery.reset().unwrap();
    assert!(!s.engine.has_instance("restore-b1"));
    s.backups.delete("b1").unwrap();

    // Machine is reusable.
    s.backups.create(Some("b2")).unwrap();
    s.recovery.initialize_recovery("b2", "restore-b2").unwrap();
}

/// An unpromoted success may be abandoned; a promoted one may not.
#[test]
fn test_reset_legality_depends_on_promotion() {
    let s = stack();
    s.backups.create(Some("b1")).unwrap();
    s.recovery.restore("b1", "restore-b1", true).unwrap();
    s.recovery.reset().unwrap();

    s.backups.create(Some("b2")).unwrap();
    s.recovery.restore("b2", "restore-b2", true).unwrap();
    s.recovery.promote_to_production().unwrap();
    assert!(matches!(
        s.recovery.reset().unwrap_err(),
        RecoveryError::InvalidState { .. }
    ));
}
