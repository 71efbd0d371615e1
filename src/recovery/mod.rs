//! Recovery state machine
//!
//! Orchestrates restore -> validate -> promote/rollback:
//!
//! - At most one recovery runs at a time: `initialize_recovery` does an
//!   atomic check-and-set on the state singleton under a mutex, never an
//!   optimistic retry (a recovery is far too expensive to redo)
//! - The chosen backup is checksum-validated before any target is touched
//! - Validation runs against the restore target, never production
//! - Promotion is the only operation that affects the serving instance,
//!   and a second mutex gate keeps cutovers mutually exclusive
//! - Every transition, including rejected attempts, is audited

mod errors;
mod state;

pub use errors::{RecoveryError, RecoveryResult};
pub use state::{RecoveryState, RecoveryStatus};

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog, AuditOperation, AuditOutcome};
use crate::backup::{artifact, BackupManager, RecoveryPin};
use crate::engine::GraphEngine;
use crate::health::{HealthChecker, HealthReport, RecoveryProgress, RecoverySignal};
use crate::observability::{Logger, Severity};

/// Drives the recovery lifecycle and owns the state singleton.
pub struct RecoveryStateMachine {
    state: Mutex<RecoveryState>,
    promotion_gate: Mutex<()>,
    cancel_requested: AtomicBool,
    engine: Arc<dyn GraphEngine>,
    backups: Arc<BackupManager>,
    health: Arc<HealthChecker>,
    audit: Arc<dyn AuditLog>,
    pin: Arc<RecoveryPin>,
    actor: String,
}

impl RecoveryStateMachine {
    pub fn new(
        engine: Arc<dyn GraphEngine>,
        backups: Arc<BackupManager>,
        health: Arc<HealthChecker>,
        audit: Arc<dyn AuditLog>,
        pin: Arc<RecoveryPin>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            state: Mutex::new(RecoveryState::new()),
            promotion_gate: Mutex::new(()),
            cancel_requested: AtomicBool::new(false),
            engine,
            backups,
            health,
            audit,
            pin,
            actor: actor.into(),
        }
    }

    /// Point-in-time copy of the state for readers.
    pub fn snapshot(&self) -> RecoveryResult<RecoveryState> {
        Ok(self.lock_state()?.clone())
    }

    /// NOT_RECOVERING -> RECOVERING, atomically.
    ///
    /// Validates the backup's checksum first; a corrupt backup is rejected
    /// before any target is touched. Concurrent callers lose the
    /// check-and-set and get `AlreadyInProgress`.
    pub fn initialize_recovery(&self, backup_id: &str, target: &str) -> RecoveryResult<()> {
        let mut state = self.lock_state()?;

        if state.status.is_active() {
            let err = RecoveryError::AlreadyInProgress {
                active: state.backup_id.clone(),
            };
            self.audit_rejection("initialize_recovery", Some(backup_id), &err);
            return Err(err);
        }

        if target == self.engine.serving_instance() {
            let err = RecoveryError::Engine(
                crate::engine::EngineError::ServingInstanceProtected(target.to_string()),
            );
            self.audit_rejection("initialize_recovery", Some(backup_id), &err);
            return Err(err);
        }

        // Still holding the state lock: the validation result cannot race
        // another initialize.
        match self.backups.validate(backup_id) {
            Ok(true) => {}
            Ok(false) => {
                let err = RecoveryError::BackupCorrupt(backup_id.to_string());
                self.audit_rejection("initialize_recovery", Some(backup_id), &err);
                return Err(err);
            }
            Err(e) => {
                let err = RecoveryError::Backup(e);
                self.audit_rejection("initialize_recovery", Some(backup_id), &err);
                return Err(err);
            }
        }

        *state = RecoveryState::begin(backup_id, target);
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.pin.pin(backup_id);
        drop(state);

        self.audit_transition("initialize_recovery", Some(backup_id), None)?;
        Logger::log(
            Severity::Info,
            "recovery_initialized",
            &[("backup_id", backup_id), ("target", target)],
        );
        Ok(())
    }

    /// Updates restore progress; legal only while RECOVERING and
    /// monotonically non-decreasing.
    pub fn update_progress(&self, percent: u8) -> RecoveryResult<()> {
        let mut state = self.lock_state()?;
        if state.status != RecoveryStatus::Recovering {
            return Err(RecoveryError::InvalidState {
                operation: "update progress",
                current: state.status.as_str(),
                remedy: "progress only moves during an active restore",
            });
        }
        let percent = percent.min(100);
        if percent < state.progress_percent {
            return Err(RecoveryError::ProgressRegression {
                from: state.progress_percent,
                to: percent,
            });
        }
        state.progress_percent = percent;
        Ok(())
    }

    /// Streams the backup artifact into the isolated restore target.
    ///
    /// On any failure (including cancellation) the machine moves to
    /// RECOVERY_FAILED and production is untouched. After the import, the
    /// restored counts are cross-checked against the backup's recorded
    /// statistics; a mismatch is an integrity fault that blocks promotion.
    pub fn execute_restore(&self) -> RecoveryResult<()> {
        let (backup_id, target) = {
            let state = self.lock_state()?;
            if state.status != RecoveryStatus::Recovering {
                return Err(RecoveryError::InvalidState {
                    operation: "execute restore",
                    current: state.status.as_str(),
                    remedy: "initialize a recovery first",
                });
            }
            (
                state.backup_id.clone().unwrap_or_default(),
                state.target_instance.clone().unwrap_or_default(),
            )
        };

        let record = self.backups.get(&backup_id)?;
        let started = Instant::now();
        let scratch =
            std::env::temp_dir().join(format!(".graphvault-restore-{}.export", Uuid::new_v4()));

        let result = (|| -> RecoveryResult<()> {
            artifact::extract_export(&record.artifact_path, &scratch)?;
            self.update_progress(25)?;

            if self.cancel_requested.load(Ordering::SeqCst) {
                return Err(RecoveryError::Cancelled(backup_id.clone()));
            }

            let mut export = File::open(&scratch)?;
            let summary = self.engine.import(&target, &mut export)?;
            self.update_progress(90)?;

            // The restore has fully stopped touching the target by the
            // time import returns; only now honor a late cancel.
            if self.cancel_requested.load(Ordering::SeqCst) {
                return Err(RecoveryError::Cancelled(backup_id.clone()));
            }

            if summary.node_count != record.node_count
                || summary.relationship_count != record.relationship_count
            {
                return Err(RecoveryError::RestoreMismatch {
                    backup_id: backup_id.clone(),
                    target: target.clone(),
                    expected_nodes: record.node_count,
                    expected_rels: record.relationship_count,
                    actual_nodes: summary.node_count,
                    actual_rels: summary.relationship_count,
                });
            }

            self.update_progress(100)?;
            Ok(())
        })();
        artifact::cleanup_partial(&scratch);

        match result {
            Ok(()) => {
                self.audit_transition("execute_restore", Some(&backup_id), None)?;
                Logger::log(
                    Severity::Info,
                    "restore_executed",
                    &[
                        ("backup_id", backup_id.as_str()),
                        ("target", target.as_str()),
                        ("duration_ms", &started.elapsed().as_millis().to_string()),
                    ],
                );
                Ok(())
            }
            Err(e) => {
                self.fail_active(&e.to_string())?;
                self.audit_rejection("execute_restore", Some(&backup_id), &e);
                Err(e)
            }
        }
    }

    /// RECOVERING -> VALIDATION, once the restore has completed.
    pub fn start_validation(&self) -> RecoveryResult<()> {
        let mut state = self.lock_state()?;
        if state.status != RecoveryStatus::Recovering {
            let err = RecoveryError::InvalidState {
                operation: "start validation",
                current: state.status.as_str(),
                remedy: "validation follows a completed restore",
            };
            self.audit_rejection("start_validation", state.backup_id.as_deref(), &err);
            return Err(err);
        }
        state.status = RecoveryStatus::Validation;
        let backup_id = state.backup_id.clone();
        drop(state);
        self.audit_transition("start_validation", backup_id.as_deref(), None)
    }

    /// Runs the health gate against the restore target and applies the
    /// passed/failed branch. Never touches production.
    pub fn run_validation(&self) -> RecoveryResult<HealthReport> {
        self.start_validation()?;
        let target = {
            let state = self.lock_state()?;
            state.target_instance.clone().unwrap_or_default()
        };

        let report = self.health.run_all(&target, true);
        if report.is_healthy() {
            self.validation_passed()?;
        } else {
            self.validation_failed(report.failure_messages())?;
        }
        Ok(report)
    }

    /// VALIDATION -> RECOVERY_SUCCESS.
    pub fn validation_passed(&self) -> RecoveryResult<()> {
        let mut state = self.lock_state()?;
        if state.status != RecoveryStatus::Validation {
            let err = RecoveryError::InvalidState {
                operation: "record validation success",
                current: state.status.as_str(),
                remedy: "start validation first",
            };
            self.audit_rejection("validation_passed", state.backup_id.as_deref(), &err);
            return Err(err);
        }
        state.status = RecoveryStatus::RecoverySuccess;
        state.completed_at = Some(Utc::now());
        let backup_id = state.backup_id.clone();
        drop(state);

        if let Some(id) = &backup_id {
            self.backups.record_health_result(id, true)?;
        }
        self.audit_transition("validation_passed", backup_id.as_deref(), None)
    }

    /// VALIDATION -> RECOVERY_FAILED; stores the validation errors.
    /// Production is untouched; the operator chooses a different backup or
    /// investigates, then resets.
    pub fn validation_failed(&self, validation_errors: Vec<String>) -> RecoveryResult<()> {
        let mut state = self.lock_state()?;
        if state.status != RecoveryStatus::Validation {
            let err = RecoveryError::InvalidState {
                operation: "record validation failure",
                current: state.status.as_str(),
                remedy: "start validation first",
            };
            self.audit_rejection("validation_failed", state.backup_id.as_deref(), &err);
            return Err(err);
        }
        state.status = RecoveryStatus::RecoveryFailed;
        state.completed_at = Some(Utc::now());
        state.validation_errors = validation_errors.clone();
        let backup_id = state.backup_id.clone();
        drop(state);

        if let Some(id) = &backup_id {
            self.backups.record_health_result(id, false)?;
        }
        Logger::log_stderr(
            Severity::Error,
            "recovery_validation_failed",
            &[
                ("backup_id", backup_id.as_deref().unwrap_or("")),
                ("errors", &validation_errors.join("; ")),
            ],
        );
        self.audit_transition_failed(
            "validation_failed",
            backup_id.as_deref(),
            validation_errors.join("; "),
        )
    }

    /// RECOVERING -> RECOVERY_SUCCESS without the health gate. Used when
    /// the operator explicitly opts out of validation on the restore call.
    pub fn finish_unvalidated(&self) -> RecoveryResult<()> {
        let mut state = self.lock_state()?;
        if state.status != RecoveryStatus::Recovering {
            let err = RecoveryError::InvalidState {
                operation: "finish without validation",
                current: state.status.as_str(),
                remedy: "only an active restore can be finished",
            };
            self.audit_rejection("finish_unvalidated", state.backup_id.as_deref(), &err);
            return Err(err);
        }
        state.status = RecoveryStatus::RecoverySuccess;
        state.completed_at = Some(Utc::now());
        let backup_id = state.backup_id.clone();
        drop(state);
        self.audit_transition("finish_unvalidated", backup_id.as_deref(), None)
    }

    /// Cuts production over to the restore target.
    ///
    /// Legal only from RECOVERY_SUCCESS, at most one cutover in flight.
    /// On success the machine returns to NOT_RECOVERING with the
    /// most-recent recovery's details retained.
    pub fn promote_to_production(&self) -> RecoveryResult<()> {
        let _gate = self
            .promotion_gate
            .try_lock()
            .map_err(|_| RecoveryError::PromotionInFlight)?;

        let mut state = self.lock_state()?;
        if state.status != RecoveryStatus::RecoverySuccess || state.promoted_to_production {
            let err = RecoveryError::InvalidState {
                operation: "promote to production",
                current: state.status.as_str(),
                remedy: "only a successful, unpromoted recovery can be promoted",
            };
            self.audit_rejection("promote_to_production", state.backup_id.as_deref(), &err);
            return Err(err);
        }

        let target = state.target_instance.clone().unwrap_or_default();
        if let Err(e) = self.engine.promote(&target) {
            let err = RecoveryError::Engine(e);
            self.audit_rejection("promote_to_production", state.backup_id.as_deref(), &err);
            return Err(err);
        }

        state.promoted_to_production = true;
        state.promoted_at = Some(Utc::now());
        state.status = RecoveryStatus::NotRecovering;
        let backup_id = state.backup_id.clone();
        drop(state);

        self.pin.clear();
        self.audit_transition("promote_to_production", backup_id.as_deref(), None)?;
        Logger::log(
            Severity::Info,
            "promoted_to_production",
            &[("target", target.as_str())],
        );
        Ok(())
    }

    /// Returns to NOT_RECOVERING, discarding the attempt and dropping the
    /// restore target. Legal from RECOVERY_FAILED, or RECOVERY_SUCCESS
    /// when not promoted.
    pub fn reset(&self) -> RecoveryResult<()> {
        let mut state = self.lock_state()?;
        let resettable = matches!(state.status, RecoveryStatus::RecoveryFailed)
            || (state.status == RecoveryStatus::RecoverySuccess && !state.promoted_to_production);
        if !resettable {
            let err = RecoveryError::InvalidState {
                operation: "reset",
                current: state.status.as_str(),
                remedy: "only a failed or unpromoted successful recovery can be reset",
            };
            self.audit_rejection("reset", state.backup_id.as_deref(), &err);
            return Err(err);
        }

        let backup_id = state.backup_id.clone();
        let target = state.target_instance.clone();
        *state = RecoveryState::new();
        drop(state);

        self.pin.clear();
        if let Some(target) = target {
            // Best effort; a leftover instance is cheap and visible.
            let _ = self.engine.drop_instance(&target);
        }
        self.audit_transition("reset", backup_id.as_deref(), None)
    }

    /// Requests cancellation of the in-flight restore. The state moves to
    /// RECOVERY_FAILED only once the restore confirms it has stopped
    /// touching the target (i.e. when `execute_restore` observes the
    /// flag and returns).
    pub fn abort(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        Logger::log(Severity::Warn, "recovery_abort_requested", &[]);
    }

    /// Full operator pipeline: initialize, restore, optionally validate.
    ///
    /// Returns the final state snapshot; on a validation failure the
    /// snapshot reports RECOVERY_FAILED with the stored errors rather
    /// than an `Err`, since the pipeline itself ran to completion.
    pub fn restore(
        &self,
        backup_id: &str,
        target: &str,
        validate: bool,
    ) -> RecoveryResult<RecoveryState> {
        self.initialize_recovery(backup_id, target)?;
        self.execute_restore()?;
        if validate {
            self.run_validation()?;
        } else {
            self.finish_unvalidated()?;
        }
        self.snapshot()
    }

    fn fail_active(&self, reason: &str) -> RecoveryResult<()> {
        let mut state = self.lock_state()?;
        if state.status.is_active() {
            state.status = RecoveryStatus::RecoveryFailed;
            state.completed_at = Some(Utc::now());
            state.validation_errors.push(reason.to_string());
        }
        Ok(())
    }

    fn lock_state(&self) -> RecoveryResult<MutexGuard<'_, RecoveryState>> {
        self.state.lock().map_err(|_| RecoveryError::LockPoisoned)
    }

    fn audit_transition(
        &self,
        transition: &str,
        backup_id: Option<&str>,
        payload: Option<serde_json::Value>,
    ) -> RecoveryResult<()> {
        let mut entry = AuditEntry::new(
            AuditOperation::Restore,
            "RecoveryState",
            &self.actor,
            AuditOutcome::Success,
        )
        .with_payload(payload.unwrap_or_else(|| json!({ "transition": transition })));
        if let Some(id) = backup_id {
            entry = entry.with_backup_id(id);
        }
        self.audit.record(&entry).map_err(crate::backup::BackupError::from)?;
        Ok(())
    }

    fn audit_transition_failed(
        &self,
        transition: &str,
        backup_id: Option<&str>,
        error: String,
    ) -> RecoveryResult<()> {
        let mut entry = AuditEntry::new(
            AuditOperation::Restore,
            "RecoveryState",
            &self.actor,
            AuditOutcome::Failed,
        )
        .with_payload(json!({ "transition": transition }))
        .with_error(error);
        if let Some(id) = backup_id {
            entry = entry.with_backup_id(id);
        }
        self.audit.record(&entry).map_err(crate::backup::BackupError::from)?;
        Ok(())
    }

    /// Best-effort audit of a rejected or failed transition attempt; the
    /// rejection itself is already being surfaced to the caller.
    fn audit_rejection(&self, transition: &str, backup_id: Option<&str>, err: &RecoveryError) {
        let mut entry = AuditEntry::new(
            AuditOperation::Restore,
            "RecoveryState",
            &self.actor,
            AuditOutcome::Conflict,
        )
        .with_payload(json!({ "transition": transition }))
        .with_error(err.to_string());
        if let Some(id) = backup_id {
            entry = entry.with_backup_id(id);
        }
        let _ = self.audit.record(&entry);
    }
}

impl RecoverySignal for RecoveryStateMachine {
    fn active_recovery(&self) -> Option<RecoveryProgress> {
        let state = self.state.lock().ok()?;
        if !state.status.is_active() {
            return None;
        }
        Some(RecoveryProgress {
            backup_id: state.backup_id.clone(),
            started_at: state.started_at,
            progress_percent: state.progress_percent,
            target_instance: state.target_instance.clone(),
        })
    }
}
