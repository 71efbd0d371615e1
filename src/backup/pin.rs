//! Recovery pin
//!
//! The recovery state machine pins the backup it is restoring from; the
//! backup manager refuses to prune or delete a pinned backup. Shared by
//! both so neither depends on the other's internals.

use std::sync::Mutex;

/// Marks at most one backup as referenced by an in-flight recovery.
#[derive(Debug, Default)]
pub struct RecoveryPin {
    inner: Mutex<Option<String>>,
}

impl RecoveryPin {
    /// No backup pinned.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins `backup_id`, replacing any previous pin.
    pub fn pin(&self, backup_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner = Some(backup_id.to_string());
        }
    }

    /// Clears the pin once the recovery reaches a terminal state.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner = None;
        }
    }

    /// The currently pinned backup id, if any.
    pub fn current(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|inner| inner.clone())
    }

    /// True if `backup_id` is pinned.
    pub fn is_pinned(&self, backup_id: &str) -> bool {
        self.current().as_deref() == Some(backup_id)
    }
}
