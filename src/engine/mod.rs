//! Graph engine boundary
//!
//! The graph database itself is an external collaborator. This module
//! defines the narrow trait the durability layer needs from it: export,
//! import into an isolated instance, a handful of consistency queries, and
//! the serving-instance cutover used by promotion.
//!
//! Every potentially slow query takes an explicit timeout so deadlines are
//! passed through the call, never polled from outside.

mod errors;
mod memory;

pub use errors::{EngineError, EngineResult};
pub use memory::{seed_ring, GraphNode, GraphRelationship, MemoryGraph, SchemaRule};

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the instance that serves production traffic by default.
pub const PRODUCTION_INSTANCE: &str = "production";

/// Aggregate graph statistics observed at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: u64,
    pub relationship_count: u64,
    pub nodes_by_label: BTreeMap<String, u64>,
    pub relationships_by_type: BTreeMap<String, u64>,
}

/// Summary returned by a completed export or import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub node_count: u64,
    pub relationship_count: u64,
    pub engine_version: String,
}

/// A required-property or constraint violation found by sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub entity_type: String,
    pub detail: String,
}

/// The durability layer's view of the graph engine.
///
/// An engine hosts named instances. `production` serves traffic; restores
/// run against isolated instances and only `promote` changes which instance
/// serves.
pub trait GraphEngine: Send + Sync {
    /// Engine software version, recorded in backup metadata.
    fn version(&self) -> String;

    /// Name of the instance currently serving production traffic.
    fn serving_instance(&self) -> String;

    /// Trivial round-trip query. Must respect the timeout.
    fn ping(&self, instance: &str, timeout: Duration) -> EngineResult<()>;

    /// Node/relationship counts, broken down by label and type.
    fn stats(&self, instance: &str, timeout: Duration) -> EngineResult<GraphStats>;

    /// Streams a full export of the instance into `sink`.
    ///
    /// Must not hold any lock that blocks concurrent writes to the
    /// instance; the counts in the summary are those observed at export
    /// time.
    fn export(&self, instance: &str, sink: &mut dyn Write) -> EngineResult<TransferSummary>;

    /// Loads an export stream into `instance`, replacing its contents.
    ///
    /// The target is created if it does not exist. Never call this against
    /// the serving instance; restores go to isolated targets.
    fn import(&self, instance: &str, source: &mut dyn Read) -> EngineResult<TransferSummary>;

    /// Samples declared entity types and reports missing or mistyped
    /// required properties and unenforced constraints.
    fn schema_violations(
        &self,
        instance: &str,
        timeout: Duration,
    ) -> EngineResult<Vec<SchemaViolation>>;

    /// Counts relationships whose source or target node no longer exists.
    fn orphaned_relationships(&self, instance: &str, timeout: Duration) -> EngineResult<u64>;

    /// Makes `instance` the new serving instance (promotion cutover).
    fn promote(&self, instance: &str) -> EngineResult<()>;

    /// Drops a non-serving instance, releasing its resources.
    fn drop_instance(&self, instance: &str) -> EngineResult<()>;
}
