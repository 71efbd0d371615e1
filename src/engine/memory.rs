//! In-memory graph engine
//!
//! A small, fully functional engine used by the CLI in development mode and
//! by the test suites. Instances are named; the export format is a
//! deterministic JSON snapshot of an instance, so exports of equal graphs
//! have equal bytes.
//!
//! Fault injection knobs simulate an unreachable or slow engine so timeout
//! and fast-fail behavior can be tested without a real network.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{EngineError, EngineResult};
use super::{GraphEngine, GraphStats, SchemaViolation, TransferSummary, PRODUCTION_INSTANCE};

/// A node with a label and arbitrary properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: u64,
    pub label: String,
    pub properties: BTreeMap<String, Value>,
}

/// A directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub id: u64,
    pub rel_type: String,
    pub from: u64,
    pub to: u64,
}

/// Required properties declared for a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRule {
    pub label: String,
    pub required_properties: Vec<String>,
}

/// One named instance's full contents. Also the export wire format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InstanceData {
    nodes: BTreeMap<u64, GraphNode>,
    relationships: BTreeMap<u64, GraphRelationship>,
    schema: Vec<SchemaRule>,
}

#[derive(Debug, Default)]
struct FaultPlan {
    fail_ping: bool,
    ping_latency: Option<Duration>,
    export_failure: Option<String>,
    transient_export_failures: Option<(String, u32)>,
    export_disk_full: bool,
}

/// In-memory engine with named instances.
pub struct MemoryGraph {
    instances: Mutex<BTreeMap<String, InstanceData>>,
    serving: Mutex<String>,
    version: String,
    faults: Mutex<FaultPlan>,
}

impl MemoryGraph {
    /// Creates an engine with an empty `production` instance.
    pub fn new() -> Self {
        let mut instances = BTreeMap::new();
        instances.insert(PRODUCTION_INSTANCE.to_string(), InstanceData::default());
        Self {
            instances: Mutex::new(instances),
            serving: Mutex::new(PRODUCTION_INSTANCE.to_string()),
            version: "memgraph-mem/0.1".to_string(),
            faults: Mutex::new(FaultPlan::default()),
        }
    }

    /// Adds a node to an instance, creating the instance if needed.
    pub fn add_node(&self, instance: &str, node: GraphNode) {
        let mut instances = self.instances.lock().expect("engine lock");
        instances.entry(instance.to_string()).or_default().nodes.insert(node.id, node);
    }

    /// Adds a relationship. Endpoints are not checked; dangling endpoints
    /// are exactly what orphan detection exists to find.
    pub fn add_relationship(&self, instance: &str, rel: GraphRelationship) {
        let mut instances = self.instances.lock().expect("engine lock");
        instances
            .entry(instance.to_string())
            .or_default()
            .relationships
            .insert(rel.id, rel);
    }

    /// Removes a node without touching its relationships, the way a write
    /// path that bypasses governance would.
    pub fn remove_node(&self, instance: &str, node_id: u64) -> bool {
        let mut instances = self.instances.lock().expect("engine lock");
        instances
            .get_mut(instance)
            .map(|data| data.nodes.remove(&node_id).is_some())
            .unwrap_or(false)
    }

    /// Declares required properties for a label.
    pub fn add_schema_rule(&self, instance: &str, rule: SchemaRule) {
        let mut instances = self.instances.lock().expect("engine lock");
        instances.entry(instance.to_string()).or_default().schema.push(rule);
    }

    /// Simulate an unreachable engine.
    pub fn set_ping_failure(&self, fail: bool) {
        self.faults.lock().expect("fault lock").fail_ping = fail;
    }

    /// Simulate a slow engine; pings "take" this long.
    pub fn set_ping_latency(&self, latency: Option<Duration>) {
        self.faults.lock().expect("fault lock").ping_latency = latency;
    }

    /// Make the next exports fail with the given message.
    pub fn set_export_failure(&self, detail: Option<&str>) {
        self.faults.lock().expect("fault lock").export_failure = detail.map(str::to_string);
    }

    /// Make the next `count` exports fail, then recover. Simulates a
    /// transient outage for retry tests.
    pub fn set_export_failures_remaining(&self, detail: &str, count: u32) {
        self.faults.lock().expect("fault lock").transient_export_failures =
            Some((detail.to_string(), count));
    }

    /// Make exports fail as if the sink's device were out of space.
    pub fn set_export_disk_full(&self, full: bool) {
        self.faults.lock().expect("fault lock").export_disk_full = full;
    }

    /// True if the named instance exists.
    pub fn has_instance(&self, instance: &str) -> bool {
        self.instances.lock().expect("engine lock").contains_key(instance)
    }

    fn with_instance<T>(
        &self,
        instance: &str,
        f: impl FnOnce(&InstanceData) -> T,
    ) -> EngineResult<T> {
        let instances = self
            .instances
            .lock()
            .map_err(|_| EngineError::Unavailable("engine state lock poisoned".to_string()))?;
        let data = instances
            .get(instance)
            .ok_or_else(|| EngineError::UnknownInstance(instance.to_string()))?;
        Ok(f(data))
    }

    fn check_deadline(&self, timeout: Duration) -> EngineResult<()> {
        let faults = self
            .faults
            .lock()
            .map_err(|_| EngineError::Unavailable("engine fault lock poisoned".to_string()))?;
        if faults.fail_ping {
            return Err(EngineError::Unavailable(
                "connection refused (simulated)".to_string(),
            ));
        }
        if let Some(latency) = faults.ping_latency {
            if latency > timeout {
                return Err(EngineError::Timeout(timeout));
            }
        }
        Ok(())
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphEngine for MemoryGraph {
    fn version(&self) -> String {
        self.version.clone()
    }

    fn serving_instance(&self) -> String {
        self.serving.lock().expect("serving lock").clone()
    }

    fn ping(&self, instance: &str, timeout: Duration) -> EngineResult<()> {
        self.check_deadline(timeout)?;
        self.with_instance(instance, |_| ())
    }

    fn stats(&self, instance: &str, timeout: Duration) -> EngineResult<GraphStats> {
        self.check_deadline(timeout)?;
        self.with_instance(instance, |data| {
            let mut stats = GraphStats {
                node_count: data.nodes.len() as u64,
                relationship_count: data.relationships.len() as u64,
                ..GraphStats::default()
            };
            for node in data.nodes.values() {
                *stats.nodes_by_label.entry(node.label.clone()).or_insert(0) += 1;
            }
            for rel in data.relationships.values() {
                *stats
                    .relationships_by_type
                    .entry(rel.rel_type.clone())
                    .or_insert(0) += 1;
            }
            stats
        })
    }

    fn export(&self, instance: &str, sink: &mut dyn Write) -> EngineResult<TransferSummary> {
        {
            let mut faults = self
                .faults
                .lock()
                .map_err(|_| EngineError::Unavailable("engine fault lock poisoned".to_string()))?;
            if let Some(detail) = &faults.export_failure {
                return Err(EngineError::ExportFailed {
                    instance: instance.to_string(),
                    detail: detail.clone(),
                });
            }
            if let Some((detail, remaining)) = &mut faults.transient_export_failures {
                if *remaining > 0 {
                    *remaining -= 1;
                    let detail = detail.clone();
                    return Err(EngineError::ExportFailed {
                        instance: instance.to_string(),
                        detail,
                    });
                }
            }
            if faults.export_disk_full {
                return Err(EngineError::Io(io::Error::new(
                    io::ErrorKind::StorageFull,
                    "no space left on device (simulated)",
                )));
            }
        }

        let (bytes, summary) = self.with_instance(instance, |data| {
            let bytes = serde_json::to_vec(data).expect("instance data serializes");
            let summary = TransferSummary {
                node_count: data.nodes.len() as u64,
                relationship_count: data.relationships.len() as u64,
                engine_version: self.version.clone(),
            };
            (bytes, summary)
        })?;

        sink.write_all(&bytes)?;
        Ok(summary)
    }

    fn import(&self, instance: &str, source: &mut dyn Read) -> EngineResult<TransferSummary> {
        if instance == self.serving_instance() {
            return Err(EngineError::ServingInstanceProtected(instance.to_string()));
        }

        let mut raw = Vec::new();
        source.read_to_end(&mut raw)?;

        let data: InstanceData =
            serde_json::from_slice(&raw).map_err(|e| EngineError::ImportFailed {
                instance: instance.to_string(),
                detail: format!("export stream is not a valid graph snapshot: {}", e),
            })?;

        let summary = TransferSummary {
            node_count: data.nodes.len() as u64,
            relationship_count: data.relationships.len() as u64,
            engine_version: self.version.clone(),
        };

        let mut instances = self
            .instances
            .lock()
            .map_err(|_| EngineError::Unavailable("engine state lock poisoned".to_string()))?;
        instances.insert(instance.to_string(), data);
        Ok(summary)
    }

    fn schema_violations(
        &self,
        instance: &str,
        timeout: Duration,
    ) -> EngineResult<Vec<SchemaViolation>> {
        self.check_deadline(timeout)?;
        self.with_instance(instance, |data| {
            let mut violations = Vec::new();
            for rule in &data.schema {
                for node in data.nodes.values().filter(|n| n.label == rule.label) {
                    for required in &rule.required_properties {
                        if !node.properties.contains_key(required) {
                            violations.push(SchemaViolation {
                                entity_type: rule.label.clone(),
                                detail: format!(
                                    "node {} is missing required property '{}'",
                                    node.id, required
                                ),
                            });
                        }
                    }
                }
            }
            violations
        })
    }

    fn orphaned_relationships(&self, instance: &str, timeout: Duration) -> EngineResult<u64> {
        self.check_deadline(timeout)?;
        self.with_instance(instance, |data| {
            data.relationships
                .values()
                .filter(|rel| {
                    !data.nodes.contains_key(&rel.from) || !data.nodes.contains_key(&rel.to)
                })
                .count() as u64
        })
    }

    fn promote(&self, instance: &str) -> EngineResult<()> {
        let instances = self
            .instances
            .lock()
            .map_err(|_| EngineError::Unavailable("engine state lock poisoned".to_string()))?;
        if !instances.contains_key(instance) {
            return Err(EngineError::UnknownInstance(instance.to_string()));
        }
        drop(instances);

        let mut serving = self
            .serving
            .lock()
            .map_err(|_| EngineError::Unavailable("engine serving lock poisoned".to_string()))?;
        *serving = instance.to_string();
        Ok(())
    }

    fn drop_instance(&self, instance: &str) -> EngineResult<()> {
        if instance == self.serving_instance() {
            return Err(EngineError::ServingInstanceProtected(instance.to_string()));
        }
        let mut instances = self
            .instances
            .lock()
            .map_err(|_| EngineError::Unavailable("engine state lock poisoned".to_string()))?;
        instances.remove(instance);
        Ok(())
    }
}

/// Seeds `instance` with `nodes` Person nodes and `rels` KNOWS relationships
/// in a ring, plus a required-property rule. Shared by tests and the CLI's
/// development engine.
pub fn seed_ring(engine: &MemoryGraph, instance: &str, nodes: u64, rels: u64) {
    for i in 0..nodes {
        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), Value::String(format!("node-{}", i)));
        engine.add_node(
            instance,
            GraphNode {
                id: i,
                label: "Person".to_string(),
                properties,
            },
        );
    }
    for i in 0..rels {
        engine.add_relationship(
            instance,
            GraphRelationship {
                id: i,
                rel_type: "KNOWS".to_string(),
                from: i % nodes.max(1),
                to: (i + 1) % nodes.max(1),
            },
        );
    }
    engine.add_schema_rule(
        instance,
        SchemaRule {
            label: "Person".to_string(),
            required_properties: vec!["name".to_string()],
        },
    );
}
