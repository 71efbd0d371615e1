//! CLI argument definitions using clap
//!
//! Commands:
//! - graphvault create [--id <id>] [--tag <tag>]...
//! - graphvault list
//! - graphvault validate <id>
//! - graphvault verify
//! - graphvault delete <id>
//! - graphvault restore <id> [--target <instance>] [--no-validate]
//! - graphvault promote
//! - graphvault reset
//! - graphvault health [--target <instance>] [--detailed]
//! - graphvault audit [filters]
//! - graphvault schedule

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// graphvault - backup, recovery and health orchestration for a graph store
#[derive(Parser, Debug)]
#[command(name = "graphvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (JSON); defaults apply when absent
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a backup of the serving instance
    Create {
        /// Backup id; generated from the timestamp when omitted
        #[arg(long)]
        id: Option<String>,

        /// Retention tag (repeatable), e.g. daily or weekly
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// List known backups, newest first
    List,

    /// Recompute a backup's checksum and compare to the stored digest
    Validate {
        /// Backup id
        id: String,
    },

    /// Report metadata/artifact pairing faults in the storage directory
    Verify,

    /// Delete a backup (artifact and metadata together)
    Delete {
        /// Backup id
        id: String,
    },

    /// Restore a backup into an isolated instance
    Restore {
        /// Backup id
        id: String,

        /// Restore target instance; defaults to restore-<id>
        #[arg(long)]
        target: Option<String>,

        /// Skip the post-restore health gate
        #[arg(long)]
        no_validate: bool,
    },

    /// Promote the last successful recovery's target to serving
    Promote,

    /// Discard a failed or unpromoted recovery
    Reset,

    /// Run the health check pipeline
    Health {
        /// Instance to check; defaults to the serving instance
        #[arg(long)]
        target: Option<String>,

        /// Include per-check durations and graph statistics
        #[arg(long)]
        detailed: bool,
    },

    /// Query the audit log
    Audit {
        /// Entries at or after this RFC 3339 timestamp
        #[arg(long)]
        from: Option<String>,

        /// Entries strictly before this RFC 3339 timestamp
        #[arg(long)]
        until: Option<String>,

        /// Restrict to one actor
        #[arg(long)]
        actor: Option<String>,

        /// Restrict to one operation kind, e.g. BACKUP or RESTORE
        #[arg(long)]
        operation: Option<String>,

        /// Restrict to one entity type
        #[arg(long)]
        entity_type: Option<String>,

        /// Show at most this many entries, newest last
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run the retention scheduler in the foreground
    Schedule,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
