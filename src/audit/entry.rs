//! Audit entry and query filter types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Governed operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
    Backup,
    Restore,
    HealthCheck,
    UnauthorizedWrite,
}

impl AuditOperation {
    /// Returns the operation name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Create => "CREATE",
            AuditOperation::Update => "UPDATE",
            AuditOperation::Delete => "DELETE",
            AuditOperation::Backup => "BACKUP",
            AuditOperation::Restore => "RESTORE",
            AuditOperation::HealthCheck => "HEALTH_CHECK",
            AuditOperation::UnauthorizedWrite => "UNAUTHORIZED_WRITE",
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of the audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Conflict,
    Failed,
}

impl AuditOutcome {
    /// Returns the outcome string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "SUCCESS",
            AuditOutcome::Conflict => "CONFLICT",
            AuditOutcome::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable record of a governed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID.
    pub id: Uuid,

    /// When the operation happened.
    pub timestamp: DateTime<Utc>,

    /// What kind of operation this was.
    pub operation: AuditOperation,

    /// Entity type the operation touched (opaque to this crate).
    pub entity_type: String,

    /// Who performed the operation.
    pub actor: String,

    /// Serialized before/after state, opaque to this crate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// How the operation ended.
    pub result: AuditOutcome,

    /// IDs of the entities the operation touched, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_entity_ids: Vec<String>,

    /// Logical transaction the operation ran in.
    pub transaction_id: Uuid,

    /// Failure detail, when result is not SUCCESS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Wall-clock duration of the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Backup this entry belongs to, when produced by a bulk restore.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
}

impl AuditEntry {
    /// Creates an entry with a fresh id, timestamp and transaction id.
    pub fn new(
        operation: AuditOperation,
        entity_type: impl Into<String>,
        actor: impl Into<String>,
        result: AuditOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            entity_type: entity_type.into(),
            actor: actor.into(),
            payload: None,
            result,
            affected_entity_ids: Vec::new(),
            transaction_id: Uuid::new_v4(),
            error_message: None,
            duration_ms: None,
            backup_id: None,
        }
    }

    /// Attach the serialized before/after state.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Record which entities the operation touched.
    pub fn with_affected(mut self, ids: Vec<String>) -> Self {
        self.affected_entity_ids = ids;
        self
    }

    /// Tie the entry to an existing logical transaction.
    pub fn with_transaction(mut self, transaction_id: Uuid) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    /// Record a failure detail.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Record the operation's duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Link the entry to a backup record.
    pub fn with_backup_id(mut self, backup_id: impl Into<String>) -> Self {
        self.backup_id = Some(backup_id.into());
        self
    }

    /// Total-order key used for deterministic replay.
    pub fn order_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.timestamp, self.id)
    }
}

/// Query filter; empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub entity_type: Option<String>,
    pub actor: Option<String>,
    pub operation: Option<AuditOperation>,
}

impl AuditFilter {
    /// Matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Entries at or after `from`.
    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    /// Entries strictly before `until`.
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Restrict to one entity type.
    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Restrict to one actor.
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Restrict to one operation kind.
    pub fn operation(mut self, operation: AuditOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// True if `entry` satisfies every set field.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp >= until {
                return false;
            }
        }
        if let Some(entity_type) = &self.entity_type {
            if &entry.entity_type != entity_type {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &entry.actor != actor {
                return false;
            }
        }
        if let Some(operation) = self.operation {
            if entry.operation != operation {
                return false;
            }
        }
        true
    }
}
