//! Multi-tier health checker
//!
//! Three independent checks run in a fixed order against a target instance
//! (live or restore candidate):
//!
//! 1. connectivity - trivial round trip; failure short-circuits the rest
//! 2. schema_consistency - required properties and declared constraints
//! 3. orphan_detection - relationships with missing endpoints; most
//!    expensive, always last
//!
//! Each check has its own timeout, passed through to the engine call. A
//! check that exceeds its budget is a FAIL with a timeout-specific
//! message, never left pending. Check failures are absorbed into the
//! report; the caller always receives a complete report, never an error.

mod report;

pub use report::{CheckResult, CheckStatus, HealthReport, HealthStatus, RecoveryProgress};

use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;

use crate::audit::{AuditEntry, AuditLog, AuditOperation, AuditOutcome};
use crate::engine::{EngineError, GraphEngine};
use crate::observability::{Logger, Severity};

/// Per-check deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckTimeouts {
    pub connectivity: Duration,
    pub schema_consistency: Duration,
    pub orphan_detection: Duration,
}

impl Default for CheckTimeouts {
    fn default() -> Self {
        Self {
            connectivity: Duration::from_secs(5),
            schema_consistency: Duration::from_secs(10),
            orphan_detection: Duration::from_secs(30),
        }
    }
}

/// Read side of the recovery machine.
///
/// Attached after construction (the machine itself holds the checker),
/// so reports can flag an in-flight recovery without a reference cycle.
pub trait RecoverySignal: Send + Sync {
    /// Details of the recovery occupying the machine, if any.
    fn active_recovery(&self) -> Option<RecoveryProgress>;
}

/// Runs the ordered check pipeline.
pub struct HealthChecker {
    engine: Arc<dyn GraphEngine>,
    audit: Arc<dyn AuditLog>,
    timeouts: CheckTimeouts,
    actor: String,
    recovery: RwLock<Option<Weak<dyn RecoverySignal>>>,
}

impl HealthChecker {
    pub fn new(
        engine: Arc<dyn GraphEngine>,
        audit: Arc<dyn AuditLog>,
        timeouts: CheckTimeouts,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            audit,
            timeouts,
            actor: actor.into(),
            recovery: RwLock::new(None),
        }
    }

    /// Wires the recovery machine's read side into subsequent reports.
    pub fn attach_recovery_signal(&self, signal: Weak<dyn RecoverySignal>) {
        if let Ok(mut slot) = self.recovery.write() {
            *slot = Some(signal);
        }
    }

    fn active_recovery(&self) -> Option<RecoveryProgress> {
        let slot = self.recovery.read().ok()?;
        slot.as_ref()?.upgrade()?.active_recovery()
    }

    /// Runs all checks against `target` in the fixed order.
    ///
    /// The first FAIL short-circuits: later checks are SKIPPED, so total
    /// latency is bounded by the failing check's timeout, not the sum of
    /// all three. `detailed` adds per-check durations and graph stats.
    /// While a recovery occupies the machine, reports for any target other
    /// than its own restore target come back UNHEALTHY with the recovery's
    /// progress attached.
    pub fn run_all(&self, target: &str, detailed: bool) -> HealthReport {
        let run_started = Instant::now();
        let mut checks = Vec::with_capacity(3);

        let connectivity = self.check_connectivity(target, detailed);
        let connectivity_failed = connectivity.status == CheckStatus::Fail;
        checks.push(connectivity);

        if connectivity_failed {
            checks.push(CheckResult::skipped("schema_consistency", "connectivity"));
            checks.push(CheckResult::skipped("orphan_detection", "connectivity"));
        } else {
            let schema = self.check_schema(target, detailed);
            let schema_failed = schema.status == CheckStatus::Fail;
            checks.push(schema);

            if schema_failed {
                checks.push(CheckResult::skipped("orphan_detection", "schema_consistency"));
            } else {
                checks.push(self.check_orphans(target, detailed));
            }
        }

        let first_failure = checks
            .iter()
            .find(|c| c.status == CheckStatus::Fail)
            .map(|c| c.name.clone());
        // An in-flight recovery degrades every report except the one
        // judging its own restore target; that run is the validation gate
        // and must reflect the checks alone.
        let recovery = self.active_recovery();
        let recovery_degrades = recovery
            .as_ref()
            .map(|r| r.target_instance.as_deref() != Some(target))
            .unwrap_or(false);
        let status = if connectivity_failed {
            HealthStatus::Unavailable
        } else if recovery_degrades || first_failure.is_some() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };

        let graph_stats = if detailed && !connectivity_failed {
            self.engine.stats(target, self.timeouts.connectivity).ok()
        } else {
            None
        };

        let report = HealthReport {
            status,
            timestamp: Utc::now(),
            target: target.to_string(),
            checks,
            graph_stats,
            first_failure: first_failure.clone(),
            recovery,
        };

        let outcome = if report.is_healthy() {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failed
        };
        let mut entry = AuditEntry::new(
            AuditOperation::HealthCheck,
            "HealthReport",
            &self.actor,
            outcome,
        )
        .with_duration_ms(run_started.elapsed().as_millis() as u64)
        .with_payload(json!({ "target": target, "status": report.status.as_str() }));
        if let Some(messages) = report.failure_messages().first() {
            entry = entry.with_error(messages.clone());
        }
        // The report must reach the caller even if the audit store is down.
        let _ = self.audit.record(&entry);

        Logger::log(
            Severity::Info,
            "health_check_complete",
            &[
                ("status", report.status.as_str()),
                ("target", target),
                ("first_failure", first_failure.as_deref().unwrap_or("none")),
            ],
        );
        report
    }

    fn check_connectivity(&self, target: &str, detailed: bool) -> CheckResult {
        let timeout = self.timeouts.connectivity;
        let started = Instant::now();
        let outcome = self.engine.ping(target, timeout);
        let elapsed = started.elapsed();

        let (status, message) = match outcome {
            Ok(()) if elapsed > timeout => (
                CheckStatus::Fail,
                timeout_message("connectivity", target, timeout),
            ),
            Ok(()) => (
                CheckStatus::Pass,
                format!("engine answered in {}ms", elapsed.as_millis()),
            ),
            Err(EngineError::Timeout(t)) => {
                (CheckStatus::Fail, timeout_message("connectivity", target, t))
            }
            Err(e) => (
                CheckStatus::Fail,
                format!("engine unreachable for '{}': {}", target, e),
            ),
        };
        finish("connectivity", status, message, elapsed, detailed)
    }

    fn check_schema(&self, target: &str, detailed: bool) -> CheckResult {
        let timeout = self.timeouts.schema_consistency;
        let started = Instant::now();
        let outcome = self.engine.schema_violations(target, timeout);
        let elapsed = started.elapsed();

        let (status, message) = match outcome {
            Ok(_) if elapsed > timeout => (
                CheckStatus::Fail,
                timeout_message("schema_consistency", target, timeout),
            ),
            Ok(violations) if violations.is_empty() => (
                CheckStatus::Pass,
                "all declared types satisfy their required properties and constraints".to_string(),
            ),
            Ok(violations) => {
                let shown: Vec<String> = violations
                    .iter()
                    .take(3)
                    .map(|v| format!("{}: {}", v.entity_type, v.detail))
                    .collect();
                (
                    CheckStatus::Fail,
                    format!(
                        "{} schema violation(s) in '{}', e.g. {}",
                        violations.len(),
                        target,
                        shown.join("; ")
                    ),
                )
            }
            Err(EngineError::Timeout(t)) => (
                CheckStatus::Fail,
                timeout_message("schema_consistency", target, t),
            ),
            Err(e) => (
                CheckStatus::Fail,
                format!("schema query against '{}' failed: {}", target, e),
            ),
        };
        finish("schema_consistency", status, message, elapsed, detailed)
    }

    fn check_orphans(&self, target: &str, detailed: bool) -> CheckResult {
        let timeout = self.timeouts.orphan_detection;
        let started = Instant::now();
        let outcome = self.engine.orphaned_relationships(target, timeout);
        let elapsed = started.elapsed();

        let (status, message) = match outcome {
            Ok(_) if elapsed > timeout => (
                CheckStatus::Fail,
                timeout_message("orphan_detection", target, timeout),
            ),
            Ok(0) => (CheckStatus::Pass, "no orphaned relationships".to_string()),
            Ok(count) => (
                CheckStatus::Fail,
                format!(
                    "found {} orphaned relationship(s) in '{}'; restore from a validated backup or repair the dangling endpoints",
                    count, target
                ),
            ),
            Err(EngineError::Timeout(t)) => (
                CheckStatus::Fail,
                timeout_message("orphan_detection", target, t),
            ),
            Err(e) => (
                CheckStatus::Fail,
                format!("orphan query against '{}' failed: {}", target, e),
            ),
        };
        finish("orphan_detection", status, message, elapsed, detailed)
    }
}

fn finish(
    name: &str,
    status: CheckStatus,
    message: String,
    elapsed: Duration,
    detailed: bool,
) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        status,
        message,
        duration_ms: if detailed {
            Some(elapsed.as_millis() as u64)
        } else {
            None
        },
    }
}

fn timeout_message(name: &str, target: &str, timeout: Duration) -> String {
    format!(
        "{} check against '{}' timed out after {}ms; the engine is reachable but answering too slowly",
        name,
        target,
        timeout.as_millis()
    )
}
