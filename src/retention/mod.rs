//! Retention scheduler
//!
//! Runs the backup cadence: a cron-driven tick creates a tier-tagged
//! backup (with exponential-backoff retries for transient failures),
//! then prunes expired backups under the retention policy. A run that
//! exhausts its retries raises an operator alert; the scheduler itself
//! keeps ticking.
//!
//! Pruning is conservative by construction: the newest usable backup is
//! never deleted, tier quotas are filled before expiry is considered,
//! and a backup pinned by an in-flight recovery is untouchable.

mod alert;
mod errors;
mod policy;

pub use alert::{Alert, AlertSink, FileAlertSink, LogAlertSink, MemoryAlertSink};
pub use errors::{RetentionError, RetentionResult};
pub use policy::{BackoffPolicy, RetentionPolicy, Tier};

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;

use crate::backup::{BackupManager, BackupRecord};
use crate::observability::{Logger, Severity};

/// How finely the timer thread polls for shutdown while waiting for the
/// next scheduled run.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Drives scheduled backups and retention pruning.
pub struct RetentionScheduler {
    backups: Arc<BackupManager>,
    policy: RetentionPolicy,
    backoff: BackoffPolicy,
    schedule: Cron,
    schedule_expr: String,
    alerts: Arc<dyn AlertSink>,
    consecutive_failures: AtomicU32,
}

impl std::fmt::Debug for RetentionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionScheduler")
            .field("schedule_expr", &self.schedule_expr)
            .finish_non_exhaustive()
    }
}

impl RetentionScheduler {
    /// Builds a scheduler from a five-field cron expression.
    pub fn new(
        backups: Arc<BackupManager>,
        policy: RetentionPolicy,
        backoff: BackoffPolicy,
        schedule_expr: &str,
        alerts: Arc<dyn AlertSink>,
    ) -> RetentionResult<Self> {
        let schedule =
            Cron::new(schedule_expr)
                .parse()
                .map_err(|e| RetentionError::InvalidSchedule {
                    expr: schedule_expr.to_string(),
                    detail: e.to_string(),
                })?;
        Ok(Self {
            backups,
            policy,
            backoff,
            schedule,
            schedule_expr: schedule_expr.to_string(),
            alerts,
            consecutive_failures: AtomicU32::new(0),
        })
    }

    /// Next scheduled run strictly after `after`.
    pub fn next_run(&self, after: DateTime<Utc>) -> RetentionResult<DateTime<Utc>> {
        self.schedule
            .find_next_occurrence(&after, false)
            .map_err(|_| RetentionError::NoUpcomingRun(self.schedule_expr.clone()))
    }

    /// One full scheduled run: create a tier-tagged backup with retries,
    /// then prune.
    ///
    /// Transient failures (engine unavailable, timeouts, I/O) are retried
    /// under the backoff policy; anything else fails the run immediately.
    /// A run that exhausts its retries raises an alert carrying the
    /// consecutive-failure count.
    pub fn run_once(&self, now: DateTime<Utc>) -> RetentionResult<BackupRecord> {
        let tier = Tier::for_timestamp(now);
        let mut tags = std::collections::BTreeSet::new();
        tags.insert(tier.tag().to_string());
        let expires = self.policy.expiry_for(tier, now);

        let mut attempt = 1u32;
        let record = loop {
            match self
                .backups
                .create_with(None, tags.clone(), Some(expires))
            {
                Ok(record) => break record,
                Err(e) if e.is_retryable() && attempt < self.backoff.max_attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    Logger::log(
                        Severity::Warn,
                        "scheduled_backup_retry",
                        &[
                            ("attempt", &attempt.to_string()),
                            ("delay_ms", &delay.as_millis().to_string()),
                            ("error", &e.to_string()),
                        ],
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    self.alerts.raise(&Alert::backup_failures(e.to_string(), failures));
                    return Err(RetentionError::AttemptsExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            }
        };
        self.consecutive_failures.store(0, Ordering::SeqCst);

        let pruned = self.backups.prune(&self.policy)?;
        Logger::log(
            Severity::Info,
            "scheduled_run_complete",
            &[
                ("backup_id", record.id.as_str()),
                ("tier", tier.tag()),
                ("pruned", &pruned.to_string()),
            ],
        );
        Ok(record)
    }

    /// Consecutive scheduled runs that have failed.
    pub fn failure_streak(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Starts the timer loop on a background thread.
    ///
    /// Each tick runs on its own worker thread so a slow backup never
    /// delays the clock. The returned handle stops the loop; an in-flight
    /// tick is allowed to finish.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();

        let thread = thread::spawn(move || {
            Logger::log(
                Severity::Info,
                "scheduler_started",
                &[("schedule", self.schedule_expr.as_str())],
            );
            while !stop.load(Ordering::SeqCst) {
                let next = match self.next_run(Utc::now()) {
                    Ok(next) => next,
                    Err(e) => {
                        Logger::log_stderr(
                            Severity::Error,
                            "scheduler_stopped",
                            &[("error", &e.to_string())],
                        );
                        return;
                    }
                };

                while Utc::now() < next {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    thread::sleep(SHUTDOWN_POLL);
                }

                let tick = self.clone();
                thread::spawn(move || {
                    // run_once logs and alerts internally; the timer loop
                    // only cares about the clock.
                    let _ = tick.run_once(Utc::now());
                });
            }
        });

        SchedulerHandle {
            shutdown,
            thread: Some(thread),
        }
    }
}

/// Stops the scheduler's timer loop when dropped or via `stop`.
pub struct SchedulerHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signals shutdown and waits for the timer thread to exit.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
