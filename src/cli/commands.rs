//! CLI command implementations
//!
//! The CLI wires the full durability stack over the bundled in-memory
//! engine seeded with a demonstration graph; deployments embed the
//! library and provide their own `GraphEngine`. State that lives in
//! memory (the recovery machine, the dev engine) does not persist
//! across invocations; backups, metadata and the audit log do.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::audit::{AuditFilter, AuditLog, AuditOperation, FileAuditLog};
use crate::backup::{BackupManager, RecoveryPin};
use crate::config::VaultConfig;
use crate::engine::{seed_ring, GraphEngine, MemoryGraph, PRODUCTION_INSTANCE};
use crate::health::{HealthChecker, RecoverySignal};
use crate::recovery::{RecoveryStateMachine, RecoveryStatus};
use crate::retention::{AlertSink, FileAlertSink, LogAlertSink, RetentionScheduler};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};

/// Fully wired durability stack for one CLI invocation.
pub struct Service {
    pub config: VaultConfig,
    pub engine: Arc<MemoryGraph>,
    pub audit: Arc<dyn AuditLog>,
    pub backups: Arc<BackupManager>,
    pub health: Arc<HealthChecker>,
    pub recovery: Arc<RecoveryStateMachine>,
}

/// Builds the service from configuration.
pub fn build_service(config_path: Option<&Path>) -> CliResult<Service> {
    let config = VaultConfig::load(config_path)?;

    let engine = Arc::new(MemoryGraph::new());
    seed_ring(&engine, PRODUCTION_INSTANCE, 50, 75);

    let audit: Arc<dyn AuditLog> = Arc::new(FileAuditLog::open(&config.audit_log)?);
    let pin = Arc::new(RecoveryPin::new());
    let backups = Arc::new(BackupManager::new(
        engine.clone(),
        audit.clone(),
        pin.clone(),
        &config.storage_dir,
        config.compression,
        &config.actor,
    )?);
    let health = Arc::new(HealthChecker::new(
        engine.clone(),
        audit.clone(),
        config.check_timeouts(),
        &config.actor,
    ));
    let recovery = Arc::new(RecoveryStateMachine::new(
        engine.clone(),
        backups.clone(),
        health.clone(),
        audit.clone(),
        pin,
        &config.actor,
    ));
    let signal_arc: Arc<dyn RecoverySignal> = recovery.clone();
    let signal: Weak<dyn RecoverySignal> = Arc::downgrade(&signal_arc);
    health.attach_recovery_signal(signal);

    Ok(Service {
        config,
        engine,
        audit,
        backups,
        health,
        recovery,
    })
}

/// Parse arguments and run the selected command.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli)
}

/// Run the appropriate command based on CLI args.
pub fn run_command(cli: Cli) -> CliResult<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Create { id, tags } => create(config_path, id.as_deref(), tags),
        Command::List => list(config_path),
        Command::Validate { id } => validate(config_path, &id),
        Command::Verify => verify(config_path),
        Command::Delete { id } => delete(config_path, &id),
        Command::Restore {
            id,
            target,
            no_validate,
        } => restore(config_path, &id, target.as_deref(), no_validate),
        Command::Promote => promote(config_path),
        Command::Reset => reset(config_path),
        Command::Health { target, detailed } => health(config_path, target.as_deref(), detailed),
        Command::Audit {
            from,
            until,
            actor,
            operation,
            entity_type,
            limit,
        } => audit(
            config_path,
            from.as_deref(),
            until.as_deref(),
            actor,
            operation.as_deref(),
            entity_type,
            limit,
        ),
        Command::Schedule => schedule(config_path),
    }
}

fn create(config_path: Option<&Path>, id: Option<&str>, tags: Vec<String>) -> CliResult<()> {
    let service = build_service(config_path)?;
    let tags: BTreeSet<String> = tags.into_iter().collect();
    let record = service.backups.create_with(id, tags, None)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn list(config_path: Option<&Path>) -> CliResult<()> {
    let service = build_service(config_path)?;
    let records = service.backups.list()?;
    if records.is_empty() {
        println!("no backups in '{}'", service.config.storage_dir.display());
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {:<11}  nodes={:<8} rels={:<8} tags={}",
            record.id,
            record.status.as_str(),
            record.node_count,
            record.relationship_count,
            record
                .tags
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(",")
        );
    }
    Ok(())
}

fn validate(config_path: Option<&Path>, id: &str) -> CliResult<()> {
    let service = build_service(config_path)?;
    if service.backups.validate(id)? {
        println!("backup '{}' is intact", id);
        Ok(())
    } else {
        Err(CliError::from(crate::backup::BackupError::Metadata {
            id: id.to_string(),
            detail: "artifact no longer matches its stored checksum".to_string(),
        }))
    }
}

fn verify(config_path: Option<&Path>) -> CliResult<()> {
    let service = build_service(config_path)?;
    let faults = service.backups.verify_layout()?;
    if faults.is_empty() {
        println!("storage layout is consistent");
        return Ok(());
    }
    for fault in &faults {
        eprintln!("{}", fault);
    }
    Err(CliError::invalid_argument(format!(
        "{} storage layout fault(s) found",
        faults.len()
    )))
}

fn delete(config_path: Option<&Path>, id: &str) -> CliResult<()> {
    let service = build_service(config_path)?;
    service.backups.delete(id)?;
    println!("deleted backup '{}'", id);
    Ok(())
}

fn restore(
    config_path: Option<&Path>,
    id: &str,
    target: Option<&str>,
    no_validate: bool,
) -> CliResult<()> {
    let service = build_service(config_path)?;
    let target = target
        .map(str::to_string)
        .unwrap_or_else(|| format!("restore-{}", id));

    let state = service.recovery.restore(id, &target, !no_validate)?;
    println!("{}", serde_json::to_string_pretty(&state)?);

    if state.status == RecoveryStatus::RecoveryFailed {
        return Err(CliError::from(crate::recovery::RecoveryError::InvalidState {
            operation: "complete the recovery",
            current: state.status.as_str(),
            remedy: "inspect validation_errors, then reset and choose another backup",
        }));
    }
    println!(
        "restored '{}' into '{}'; run 'graphvault promote' to make it serving",
        id, target
    );
    Ok(())
}

fn promote(config_path: Option<&Path>) -> CliResult<()> {
    let service = build_service(config_path)?;
    service.recovery.promote_to_production()?;
    println!("promoted; serving instance is now '{}'", service.engine.serving_instance());
    Ok(())
}

fn reset(config_path: Option<&Path>) -> CliResult<()> {
    let service = build_service(config_path)?;
    service.recovery.reset()?;
    println!("recovery state reset");
    Ok(())
}

fn health(config_path: Option<&Path>, target: Option<&str>, detailed: bool) -> CliResult<()> {
    let service = build_service(config_path)?;
    let target = target
        .map(str::to_string)
        .unwrap_or_else(|| service.engine.serving_instance());

    // An in-flight recovery is folded into the report by the checker
    // itself; the machine's read side is attached in build_service.
    let report = service.health.run_all(&target, detailed);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn audit(
    config_path: Option<&Path>,
    from: Option<&str>,
    until: Option<&str>,
    actor: Option<String>,
    operation: Option<&str>,
    entity_type: Option<String>,
    limit: Option<usize>,
) -> CliResult<()> {
    let service = build_service(config_path)?;

    let mut filter = AuditFilter::all();
    if let Some(raw) = from {
        filter = filter.from(parse_timestamp("--from", raw)?);
    }
    if let Some(raw) = until {
        filter = filter.until(parse_timestamp("--until", raw)?);
    }
    if let Some(actor) = actor {
        filter = filter.actor(actor);
    }
    if let Some(raw) = operation {
        filter = filter.operation(parse_operation(raw)?);
    }
    if let Some(entity_type) = entity_type {
        filter = filter.entity_type(entity_type);
    }

    let mut entries = service.audit.query(&filter)?;
    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    for entry in entries {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}

fn schedule(config_path: Option<&Path>) -> CliResult<()> {
    let service = build_service(config_path)?;
    let alerts: Arc<dyn AlertSink> = match &service.config.alert_log {
        Some(path) => Arc::new(FileAlertSink::open(path)?),
        None => Arc::new(LogAlertSink),
    };
    let scheduler = Arc::new(RetentionScheduler::new(
        service.backups.clone(),
        service.config.retention.clone(),
        service.config.backoff.clone(),
        &service.config.schedule,
        alerts,
    )?);

    println!(
        "scheduler running ('{}'), next run {}",
        service.config.schedule,
        scheduler.next_run(Utc::now())?.to_rfc3339()
    );

    let _handle = scheduler.start();
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}

fn parse_timestamp(flag: &str, raw: &str) -> CliResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            CliError::invalid_argument(format!(
                "{} expects an RFC 3339 timestamp, got '{}': {}",
                flag, raw, e
            ))
        })
}

fn parse_operation(raw: &str) -> CliResult<AuditOperation> {
    match raw.to_ascii_uppercase().as_str() {
        "CREATE" => Ok(AuditOperation::Create),
        "UPDATE" => Ok(AuditOperation::Update),
        "DELETE" => Ok(AuditOperation::Delete),
        "BACKUP" => Ok(AuditOperation::Backup),
        "RESTORE" => Ok(AuditOperation::Restore),
        "HEALTH_CHECK" => Ok(AuditOperation::HealthCheck),
        "UNAUTHORIZED_WRITE" => Ok(AuditOperation::UnauthorizedWrite),
        _ => Err(CliError::invalid_argument(format!(
            "unknown operation '{}'; expected one of CREATE, UPDATE, DELETE, BACKUP, RESTORE, HEALTH_CHECK, UNAUTHORIZED_WRITE",
            raw
        ))),
    }
}
