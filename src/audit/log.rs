//! Audit log trait and backends
//!
//! - Append-only: neither backend exposes mutation or deletion
//! - `FileAuditLog` writes one JSON record per line and fsyncs every append
//!   so an acknowledged entry survives a crash
//! - `MemoryAuditLog` backs the test suites

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::entry::{AuditEntry, AuditFilter};
use super::errors::{AuditError, AuditResult};

/// Narrow interface over the audit store.
pub trait AuditLog: Send + Sync {
    /// Appends an entry. Must be durable before returning; the caller
    /// invokes this inside the same logical transaction as the operation
    /// the entry describes.
    fn record(&self, entry: &AuditEntry) -> AuditResult<()>;

    /// Returns matching entries ordered by `(timestamp, id)`.
    fn query(&self, filter: &AuditFilter) -> AuditResult<Vec<AuditEntry>>;

    /// Flags entries whose actor is not on the governed allow-list,
    /// catching writes that bypassed the intended write path.
    fn detect_unauthorized(&self, known_actors: &[String]) -> AuditResult<Vec<AuditEntry>> {
        let entries = self.query(&AuditFilter::all())?;
        Ok(entries
            .into_iter()
            .filter(|e| !known_actors.iter().any(|a| a == &e.actor))
            .collect())
    }
}

/// File-backed audit log: one JSON entry per line, fsync per append.
pub struct FileAuditLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditLog {
    /// Opens or creates the log file in append mode.
    pub fn open(path: impl AsRef<Path>) -> AuditResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditLog for FileAuditLog {
    fn record(&self, entry: &AuditEntry) -> AuditResult<()> {
        let line = serde_json::to_string(entry)?;
        let mut writer = self.writer.lock().map_err(|_| AuditError::LockPoisoned)?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn query(&self, filter: &AuditFilter) -> AuditResult<Vec<AuditEntry>> {
        // Reads through a separate handle; the append handle never seeks.
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line)?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| e.order_key());
        Ok(entries)
    }
}

/// In-memory audit log for tests.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, entry: &AuditEntry) -> AuditResult<()> {
        self.entries
            .lock()
            .map_err(|_| AuditError::LockPoisoned)?
            .push(entry.clone());
        Ok(())
    }

    fn query(&self, filter: &AuditFilter) -> AuditResult<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .entries
            .lock()
            .map_err(|_| AuditError::LockPoisoned)?
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.order_key());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditOperation, AuditOutcome};
    use chrono::Duration;
    use tempfile::TempDir;

    fn entry(op: AuditOperation, actor: &str) -> AuditEntry {
        AuditEntry::new(op, "BackupRecord", actor, AuditOutcome::Success)
    }

    #[test]
    fn test_memory_log_append_and_query() {
        let log = MemoryAuditLog::new();
        log.record(&entry(AuditOperation::Backup, "scheduler")).unwrap();
        log.record(&entry(AuditOperation::Restore, "operator")).unwrap();

        assert_eq!(log.len(), 2);
        let backups = log
            .query(&AuditFilter::all().operation(AuditOperation::Backup))
            .unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].actor, "scheduler");
    }

    #[test]
    fn test_file_log_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.log");

        {
            let log = FileAuditLog::open(&path).unwrap();
            log.record(&entry(AuditOperation::Backup, "scheduler")).unwrap();
            log.record(&entry(AuditOperation::HealthCheck, "health-checker"))
                .unwrap();
        }

        let log = FileAuditLog::open(&path).unwrap();
        let all = log.query(&AuditFilter::all()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_query_orders_by_timestamp_then_id() {
        let log = MemoryAuditLog::new();

        let mut later = entry(AuditOperation::Backup, "scheduler");
        later.timestamp = later.timestamp + Duration::seconds(60);
        let earlier = entry(AuditOperation::Backup, "scheduler");

        // Recorded out of order
        log.record(&later).unwrap();
        log.record(&earlier).unwrap();

        let all = log.query(&AuditFilter::all()).unwrap();
        assert_eq!(all[0].id, earlier.id);
        assert_eq!(all[1].id, later.id);
    }

    #[test]
    fn test_detect_unauthorized() {
        let log = MemoryAuditLog::new();
        log.record(&entry(AuditOperation::Backup, "scheduler")).unwrap();
        log.record(&entry(AuditOperation::Create, "rogue-script")).unwrap();

        let known = vec!["scheduler".to_string(), "operator".to_string()];
        let flagged = log.detect_unauthorized(&known).unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].actor, "rogue-script");
    }

    #[test]
    fn test_file_log_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.log");

        let log = FileAuditLog::open(&path).unwrap();
        log.record(&entry(AuditOperation::Backup, "scheduler")).unwrap();
        drop(log);

        // Simulate a trailing blank line after crash recovery of the host
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file).unwrap();
        drop(file);

        let log = FileAuditLog::open(&path).unwrap();
        assert_eq!(log.query(&AuditFilter::all()).unwrap().len(), 1);
    }
}
