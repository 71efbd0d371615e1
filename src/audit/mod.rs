//! Append-only audit log
//!
//! Every governed operation (backup, restore, health check, and the write
//! paths layered on top of this crate) records exactly one entry in the
//! same commit-or-rollback unit as the operation it describes. Entries are
//! never mutated or deleted; ordering is total by `(timestamp, id)` so a
//! replay is deterministic.
//!
//! The [`AuditLog`] trait is deliberately narrow (`record`, `query`,
//! `detect_unauthorized`) so the backing store can be swapped without
//! touching the components above it.

mod entry;
mod errors;
mod log;

pub use entry::{AuditEntry, AuditFilter, AuditOperation, AuditOutcome};
pub use errors::{AuditError, AuditResult};
pub use log::{AuditLog, FileAuditLog, MemoryAuditLog};
