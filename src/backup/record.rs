//! Backup record and status lifecycle

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::BackupError;

/// Lifecycle status of a backup.
///
/// Status only ever advances: InProgress -> {Complete, Failed} ->
/// {Validated, Archived}. It never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    InProgress,
    Complete,
    Failed,
    Validated,
    Archived,
}

impl BackupStatus {
    /// Returns the status name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::InProgress => "IN_PROGRESS",
            BackupStatus::Complete => "COMPLETE",
            BackupStatus::Failed => "FAILED",
            BackupStatus::Validated => "VALIDATED",
            BackupStatus::Archived => "ARCHIVED",
        }
    }

    /// True if `next` is a legal advance from this status.
    pub fn can_advance_to(&self, next: BackupStatus) -> bool {
        use BackupStatus::*;
        matches!(
            (self, next),
            (InProgress, Complete)
                | (InProgress, Failed)
                | (Complete, Validated)
                | (Complete, Archived)
                | (Validated, Archived)
        )
    }

    /// True for statuses that have a usable artifact on disk.
    pub fn has_artifact(&self) -> bool {
        matches!(self, BackupStatus::Complete | BackupStatus::Validated | BackupStatus::Archived)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One point-in-time snapshot of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Unique, immutable id (timestamp-derived unless supplied).
    pub id: String,

    pub created_at: DateTime<Utc>,

    /// When the retention policy may reclaim this backup. `None` means
    /// never pruned automatically.
    pub expires_at: Option<DateTime<Utc>>,

    /// Where the compressed artifact lives.
    pub artifact_path: PathBuf,

    /// Bytes of raw export data before compression.
    pub uncompressed_bytes: u64,

    /// Bytes of the finished artifact on disk.
    pub compressed_bytes: u64,

    /// SHA-256 of the finished artifact. Set exactly once, at COMPLETE;
    /// a later mismatch is corruption, not a reason to recompute.
    pub checksum: Option<String>,

    /// Engine software version at export time.
    pub engine_version: String,

    /// Wall-clock duration of the create operation.
    pub duration_ms: u64,

    /// Nodes observed at export time.
    pub node_count: u64,

    /// Relationships observed at export time.
    pub relationship_count: u64,

    pub status: BackupStatus,

    /// Outcome of the last post-restore health check run against this
    /// backup, if any.
    pub health_check_passed: Option<bool>,

    /// Free-form tags; the retention scheduler uses `daily`/`weekly`.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub notes: String,
}

impl BackupRecord {
    /// Starts a record in IN_PROGRESS.
    pub fn begin(id: &str, artifact_path: PathBuf, engine_version: String) -> Self {
        Self {
            id: id.to_string(),
            created_at: Utc::now(),
            expires_at: None,
            artifact_path,
            uncompressed_bytes: 0,
            compressed_bytes: 0,
            checksum: None,
            engine_version,
            duration_ms: 0,
            node_count: 0,
            relationship_count: 0,
            status: BackupStatus::InProgress,
            health_check_passed: None,
            tags: BTreeSet::new(),
            notes: String::new(),
        }
    }

    /// Advances the status, rejecting regressions and illegal jumps.
    pub fn advance(&mut self, next: BackupStatus) -> Result<(), BackupError> {
        if !self.status.can_advance_to(next) {
            return Err(BackupError::StatusRegression {
                id: self.id.clone(),
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Marks the record COMPLETE, setting the checksum for the only time
    /// in its life.
    pub fn complete(
        &mut self,
        checksum: String,
        uncompressed_bytes: u64,
        compressed_bytes: u64,
        node_count: u64,
        relationship_count: u64,
        duration_ms: u64,
    ) -> Result<(), BackupError> {
        self.advance(BackupStatus::Complete)?;
        self.checksum = Some(checksum);
        self.uncompressed_bytes = uncompressed_bytes;
        self.compressed_bytes = compressed_bytes;
        self.node_count = node_count;
        self.relationship_count = relationship_count;
        self.duration_ms = duration_ms;
        Ok(())
    }

    /// Marks the record FAILED with a reason in `notes`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), BackupError> {
        self.advance(BackupStatus::Failed)?;
        self.notes = reason.into();
        Ok(())
    }

    /// True once the retention deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BackupRecord {
        BackupRecord::begin(
            "20260829T030000Z",
            PathBuf::from("/backups/20260829T030000Z.tar.gz"),
            "memgraph-mem/0.1".to_string(),
        )
    }

    #[test]
    fn test_new_record_is_in_progress_without_checksum() {
        let r = record();
        assert_eq!(r.status, BackupStatus::InProgress);
        assert!(r.checksum.is_none());
        assert!(r.health_check_passed.is_none());
    }

    #[test]
    fn test_complete_sets_checksum_once() {
        let mut r = record();
        r.complete("sha256:ab".repeat(1), 100, 40, 10, 25, 12).unwrap();
        assert_eq!(r.status, BackupStatus::Complete);
        assert!(r.checksum.is_some());
        assert_eq!(r.node_count, 10);
        assert_eq!(r.relationship_count, 25);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut r = record();
        r.advance(BackupStatus::Complete).unwrap();
        r.advance(BackupStatus::Validated).unwrap();

        assert!(r.advance(BackupStatus::Complete).is_err());
        assert!(r.advance(BackupStatus::InProgress).is_err());
        assert!(r.advance(BackupStatus::Failed).is_err());
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut r = record();
        r.fail("export failed: engine unreachable").unwrap();
        assert_eq!(r.status, BackupStatus::Failed);
        assert!(r.advance(BackupStatus::Complete).is_err());
        assert!(r.advance(BackupStatus::Validated).is_err());
    }

    #[test]
    fn test_archival_paths() {
        let mut r = record();
        r.advance(BackupStatus::Complete).unwrap();
        r.advance(BackupStatus::Archived).unwrap();
        assert_eq!(r.status, BackupStatus::Archived);

        let mut r2 = record();
        r2.advance(BackupStatus::Complete).unwrap();
        r2.advance(BackupStatus::Validated).unwrap();
        r2.advance(BackupStatus::Archived).unwrap();
        assert_eq!(r2.status, BackupStatus::Archived);
    }

    #[test]
    fn test_expiry() {
        let mut r = record();
        assert!(!r.is_expired(Utc::now()));

        r.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(r.is_expired(Utc::now()));

        r.expires_at = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(!r.is_expired(Utc::now()));
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut r = record();
        r.complete("sha256:cd".to_string(), 1, 2, 3, 4, 5).unwrap();
        r.tags.insert("daily".to_string());

        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("COMPLETE"));
        let back: BackupRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, r.id);
        assert_eq!(back.status, BackupStatus::Complete);
        assert!(back.tags.contains("daily"));
    }
}
