//! Backup subsystem
//!
//! Produces portable, self-contained artifacts suitable for restore.
//!
//! - Zero partial success: a failed create leaves no artifact behind
//! - The checksum is computed once, when the artifact is complete
//! - A checksum mismatch is an integrity fault, surfaced and logged,
//!   never auto-repaired
//! - Metadata record and artifact are created and deleted together
//!
//! # Algorithm
//!
//! 1. Take the creation lock (reject a concurrent create)
//! 2. Stream the engine export of the serving instance to a scratch file
//! 3. Pack scratch file + manifest into `<id>.tar[.gz].partial`, fsync
//! 4. Compute the SHA-256 of the finished artifact
//! 5. Rename `.partial` into place
//! 6. Persist the metadata record (tmp + rename), status COMPLETE
//! 7. Record the audit entry
//!
//! Export is read-only against the engine; backup never blocks concurrent
//! writes to the live graph.

pub(crate) mod artifact;
mod errors;
mod pin;
mod record;

pub use artifact::ArtifactManifest;
pub use errors::{BackupError, BackupResult};
pub use pin::RecoveryPin;
pub use record::{BackupRecord, BackupStatus};

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::audit::{AuditEntry, AuditLog, AuditOperation, AuditOutcome};
use crate::checksum;
use crate::engine::{GraphEngine, TransferSummary};
use crate::observability::{Logger, Severity};
use crate::retention::RetentionPolicy;

use artifact::{ArtifactManifest as Manifest, CountingWriter};

/// Creates, lists, validates and prunes point-in-time backups.
pub struct BackupManager {
    engine: Arc<dyn GraphEngine>,
    audit: Arc<dyn AuditLog>,
    pin: Arc<RecoveryPin>,
    storage_dir: PathBuf,
    compression: bool,
    actor: String,
    create_lock: Mutex<()>,
}

impl BackupManager {
    /// Opens a manager over `storage_dir`, creating the directory if
    /// needed.
    pub fn new(
        engine: Arc<dyn GraphEngine>,
        audit: Arc<dyn AuditLog>,
        pin: Arc<RecoveryPin>,
        storage_dir: impl Into<PathBuf>,
        compression: bool,
        actor: impl Into<String>,
    ) -> BackupResult<Self> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir)
            .map_err(|e| BackupError::io("creating storage directory", &storage_dir, e))?;
        Ok(Self {
            engine,
            audit,
            pin,
            storage_dir,
            compression,
            actor: actor.into(),
            create_lock: Mutex::new(()),
        })
    }

    /// Backup storage directory.
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Creates a backup with no tags and no expiry.
    pub fn create(&self, requested_id: Option<&str>) -> BackupResult<BackupRecord> {
        self.create_with(requested_id, BTreeSet::new(), None)
    }

    /// Creates a backup with retention tags and an expiry deadline.
    ///
    /// On any failure the partial artifact is deleted, a FAILED record is
    /// persisted, and the underlying error is surfaced. Retrying belongs
    /// to the caller (the retention scheduler), not here.
    pub fn create_with(
        &self,
        requested_id: Option<&str>,
        tags: BTreeSet<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> BackupResult<BackupRecord> {
        let _guard = self
            .create_lock
            .try_lock()
            .map_err(|_| BackupError::CreationInProgress)?;

        let started = Instant::now();
        let id = match requested_id {
            Some(id) => {
                if self.metadata_path(id).exists() {
                    return Err(BackupError::DuplicateId(id.to_string()));
                }
                id.to_string()
            }
            None => self.generate_id(),
        };

        let artifact_path = self.storage_dir.join(self.artifact_name(&id));
        let mut record = BackupRecord::begin(&id, artifact_path.clone(), self.engine.version());
        record.tags = tags;
        record.expires_at = expires_at;

        match self.run_export(&id, &artifact_path, &mut record, started) {
            Ok(()) => {
                self.store(&record)?;
                self.audit.record(
                    &AuditEntry::new(
                        AuditOperation::Backup,
                        "BackupRecord",
                        &self.actor,
                        AuditOutcome::Success,
                    )
                    .with_backup_id(&id)
                    .with_affected(vec![id.clone()])
                    .with_duration_ms(record.duration_ms)
                    .with_payload(json!({
                        "node_count": record.node_count,
                        "relationship_count": record.relationship_count,
                        "checksum": record.checksum,
                        "compressed_bytes": record.compressed_bytes,
                    })),
                )?;
                Logger::log(
                    Severity::Info,
                    "backup_complete",
                    &[
                        ("backup_id", &id),
                        ("nodes", &record.node_count.to_string()),
                        ("relationships", &record.relationship_count.to_string()),
                    ],
                );
                Ok(record)
            }
            Err(e) => {
                let reason = e.to_string();
                let _ = record.fail(&reason);
                let _ = self.store(&record);
                let _ = self.audit.record(
                    &AuditEntry::new(
                        AuditOperation::Backup,
                        "BackupRecord",
                        &self.actor,
                        AuditOutcome::Failed,
                    )
                    .with_backup_id(&id)
                    .with_error(&reason),
                );
                Logger::log_stderr(
                    Severity::Error,
                    "backup_failed",
                    &[("backup_id", id.as_str()), ("error", reason.as_str())],
                );
                Err(e)
            }
        }
    }

    fn run_export(
        &self,
        id: &str,
        artifact_path: &Path,
        record: &mut BackupRecord,
        started: Instant,
    ) -> BackupResult<()> {
        let export_tmp = self.storage_dir.join(format!(".{}.export", id));
        let partial = {
            let mut os = artifact_path.as_os_str().to_owned();
            os.push(".partial");
            PathBuf::from(os)
        };

        let result = (|| -> BackupResult<(u64, TransferSummary)> {
            let file = File::create(&export_tmp)
                .map_err(|e| BackupError::io("creating export scratch file", &export_tmp, e))?;
            let mut counter = CountingWriter::new(BufWriter::new(file));

            let serving = self.engine.serving_instance();
            // I/O failures inside the export stream get the same disk-full
            // promotion as the manager's own writes.
            let summary = self
                .engine
                .export(&serving, &mut counter)
                .map_err(|e| match e {
                    crate::engine::EngineError::Io(source) => {
                        BackupError::io("streaming export", &export_tmp, source)
                    }
                    other => BackupError::Engine(other),
                })?;

            counter
                .flush()
                .map_err(|e| BackupError::io("flushing export stream", &export_tmp, e))?;
            let uncompressed = counter.bytes_written();
            let writer = counter.into_inner();
            let file = writer
                .into_inner()
                .map_err(|e| BackupError::io("flushing export stream", &export_tmp, e.into_error()))?;
            file.sync_all()
                .map_err(|e| BackupError::io("syncing export stream", &export_tmp, e))?;

            let manifest = Manifest {
                format_version: 1,
                backup_id: id.to_string(),
                created_at: record.created_at,
                node_count: summary.node_count,
                relationship_count: summary.relationship_count,
                engine_version: summary.engine_version.clone(),
            };
            artifact::pack(&export_tmp, &manifest, &partial, self.compression)
                .map_err(|e| BackupError::io("packing artifact", &partial, e))?;

            let digest = checksum::compute_file_digest(&partial)?;
            let compressed = fs::metadata(&partial)
                .map_err(|e| BackupError::io("reading artifact size", &partial, e))?
                .len();

            fs::rename(&partial, artifact_path)
                .map_err(|e| BackupError::io("finalizing artifact", artifact_path, e))?;

            record.complete(
                digest,
                uncompressed,
                compressed,
                summary.node_count,
                summary.relationship_count,
                started.elapsed().as_millis() as u64,
            )?;
            Ok((uncompressed, summary))
        })();

        artifact::cleanup_partial(&export_tmp);
        if result.is_err() {
            artifact::cleanup_partial(&partial);
        }
        result.map(|_| ())
    }

    /// All known records, newest first.
    pub fn list(&self) -> BackupResult<Vec<BackupRecord>> {
        let entries = fs::read_dir(&self.storage_dir)
            .map_err(|e| BackupError::io("reading storage directory", &self.storage_dir, e))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| BackupError::io("reading storage directory", &self.storage_dir, e))?;
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let id = name.trim_end_matches(".json").to_string();
            let raw = fs::read_to_string(&path)
                .map_err(|e| BackupError::io("reading backup metadata", &path, e))?;
            let record: BackupRecord =
                serde_json::from_str(&raw).map_err(|e| BackupError::Metadata {
                    id,
                    detail: e.to_string(),
                })?;
            records.push(record);
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(records)
    }

    /// Loads one record by id.
    pub fn get(&self, id: &str) -> BackupResult<BackupRecord> {
        let path = self.metadata_path(id);
        if !path.exists() {
            return Err(BackupError::UnknownBackup(id.to_string()));
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| BackupError::io("reading backup metadata", &path, e))?;
        serde_json::from_str(&raw).map_err(|e| BackupError::Metadata {
            id: id.to_string(),
            detail: e.to_string(),
        })
    }

    /// Recomputes the artifact digest and compares it to the stored value.
    ///
    /// Returns `Ok(false)` on mismatch. The mismatch is logged as a
    /// data-integrity event and audited; the stored checksum is never
    /// touched. A passing validation advances COMPLETE -> VALIDATED.
    pub fn validate(&self, id: &str) -> BackupResult<bool> {
        let started = Instant::now();
        let mut record = self.get(id)?;
        let stored = match &record.checksum {
            Some(c) => c.clone(),
            None => {
                return Err(BackupError::NotValidatable {
                    id: id.to_string(),
                    status: record.status.as_str(),
                })
            }
        };

        let matches = if record.artifact_path.exists() {
            checksum::verify_file(&record.artifact_path, &stored)?
        } else {
            // Metadata without its artifact is the same fault as corruption
            false
        };

        if matches {
            if record.status == BackupStatus::Complete {
                record.advance(BackupStatus::Validated)?;
                self.store(&record)?;
            }
            self.audit.record(
                &AuditEntry::new(
                    AuditOperation::Backup,
                    "BackupRecord",
                    &self.actor,
                    AuditOutcome::Success,
                )
                .with_backup_id(id)
                .with_duration_ms(started.elapsed().as_millis() as u64)
                .with_payload(json!({ "validated": true })),
            )?;
        } else {
            let detail = format!(
                "checksum mismatch for backup '{}': artifact '{}' no longer matches its stored digest; the artifact is corrupt, restore from a different backup",
                id,
                record.artifact_path.display()
            );
            Logger::log_stderr(
                Severity::Error,
                "backup_integrity_mismatch",
                &[("backup_id", id), ("detail", detail.as_str())],
            );
            self.audit.record(
                &AuditEntry::new(
                    AuditOperation::Backup,
                    "BackupRecord",
                    &self.actor,
                    AuditOutcome::Failed,
                )
                .with_backup_id(id)
                .with_error(&detail),
            )?;
        }
        Ok(matches)
    }

    /// Deletes expired backups under the retention policy.
    ///
    /// Protected from deletion, even when expired:
    /// - the newest `keep_daily` daily-tagged and `keep_weekly`
    ///   weekly-tagged usable backups (count-based tiers)
    /// - the backup pinned by an in-flight recovery
    /// - the single most recent usable backup (retention floor)
    pub fn prune(&self, policy: &RetentionPolicy) -> BackupResult<usize> {
        let now = Utc::now();
        let records = self.list()?;
        let pinned = self.pin.current();
        let floor = records
            .iter()
            .find(|r| r.status.has_artifact())
            .map(|r| r.id.clone());

        let mut kept_daily = 0usize;
        let mut kept_weekly = 0usize;
        let mut deleted = Vec::new();

        for record in &records {
            let holds_tier_slot = if record.status.has_artifact() {
                if record.tags.contains("weekly") && kept_weekly < policy.keep_weekly {
                    kept_weekly += 1;
                    true
                } else if record.tags.contains("daily") && kept_daily < policy.keep_daily {
                    kept_daily += 1;
                    true
                } else {
                    false
                }
            } else {
                false
            };

            let protected = holds_tier_slot
                || pinned.as_deref() == Some(record.id.as_str())
                || floor.as_deref() == Some(record.id.as_str());

            if !protected && record.is_expired(now) {
                self.remove_files(record)?;
                deleted.push(record.id.clone());
            }
        }

        if !deleted.is_empty() {
            self.audit.record(
                &AuditEntry::new(
                    AuditOperation::Delete,
                    "BackupRecord",
                    &self.actor,
                    AuditOutcome::Success,
                )
                .with_affected(deleted.clone())
                .with_payload(json!({ "pruned": deleted.len() })),
            )?;
            Logger::log(
                Severity::Info,
                "retention_pruned",
                &[("deleted", &deleted.len().to_string())],
            );
        }
        Ok(deleted.len())
    }

    /// Deletes one backup (artifact and metadata together).
    pub fn delete(&self, id: &str) -> BackupResult<()> {
        if self.pin.is_pinned(id) {
            return Err(BackupError::PinnedByRecovery(id.to_string()));
        }
        let record = self.get(id)?;
        self.remove_files(&record)?;
        self.audit.record(
            &AuditEntry::new(
                AuditOperation::Delete,
                "BackupRecord",
                &self.actor,
                AuditOutcome::Success,
            )
            .with_backup_id(id)
            .with_affected(vec![id.to_string()]),
        )?;
        Ok(())
    }

    /// Stores the outcome of a post-restore health check against this
    /// backup. Called by the recovery state machine, never directly by the
    /// health checker.
    pub fn record_health_result(&self, id: &str, passed: bool) -> BackupResult<()> {
        let mut record = self.get(id)?;
        record.health_check_passed = Some(passed);
        if passed && record.status == BackupStatus::Complete {
            record.advance(BackupStatus::Validated)?;
        }
        self.store(&record)
    }

    /// Reports metadata/artifact pairing faults: a usable record whose
    /// artifact is missing, or an artifact with no metadata.
    pub fn verify_layout(&self) -> BackupResult<Vec<String>> {
        let mut faults = Vec::new();

        for record in self.list()? {
            if record.status.has_artifact() && !record.artifact_path.exists() {
                faults.push(format!(
                    "backup '{}' has metadata but its artifact '{}' is missing",
                    record.id,
                    record.artifact_path.display()
                ));
            }
        }

        let entries = fs::read_dir(&self.storage_dir)
            .map_err(|e| BackupError::io("reading storage directory", &self.storage_dir, e))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| BackupError::io("reading storage directory", &self.storage_dir, e))?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            if name.starts_with('.') || name.ends_with(".partial") {
                continue;
            }
            let id = if let Some(stripped) = name.strip_suffix(".tar.gz") {
                stripped
            } else if let Some(stripped) = name.strip_suffix(".tar") {
                stripped
            } else {
                continue;
            };
            if !self.metadata_path(id).exists() {
                faults.push(format!(
                    "artifact '{}' has no metadata record; it cannot be validated or restored",
                    name
                ));
            }
        }
        Ok(faults)
    }

    fn remove_files(&self, record: &BackupRecord) -> BackupResult<()> {
        if record.artifact_path.exists() {
            fs::remove_file(&record.artifact_path)
                .map_err(|e| BackupError::io("deleting artifact", &record.artifact_path, e))?;
        }
        let meta = self.metadata_path(&record.id);
        fs::remove_file(&meta).map_err(|e| BackupError::io("deleting metadata", &meta, e))?;
        Ok(())
    }

    fn store(&self, record: &BackupRecord) -> BackupResult<()> {
        let path = self.metadata_path(&record.id);
        let tmp = self.storage_dir.join(format!(".{}.json.tmp", record.id));
        let raw = serde_json::to_string_pretty(record).map_err(|e| BackupError::Metadata {
            id: record.id.clone(),
            detail: e.to_string(),
        })?;

        let mut file =
            File::create(&tmp).map_err(|e| BackupError::io("writing backup metadata", &tmp, e))?;
        file.write_all(raw.as_bytes())
            .map_err(|e| BackupError::io("writing backup metadata", &tmp, e))?;
        file.sync_all()
            .map_err(|e| BackupError::io("syncing backup metadata", &tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| BackupError::io("finalizing backup metadata", &path, e))?;
        Ok(())
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.json", id))
    }

    fn artifact_name(&self, id: &str) -> String {
        if self.compression {
            format!("{}.tar.gz", id)
        } else {
            format!("{}.tar", id)
        }
    }

    fn generate_id(&self) -> String {
        let base = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        if !self.metadata_path(&base).exists() {
            return base;
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !self.metadata_path(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }
}
