//! graphvault - Durability orchestrator for a persistent graph store
//!
//! The graph engine itself is an external collaborator reached through the
//! [`engine::GraphEngine`] trait. Everything here is about making its data
//! survive process and host failure:
//!
//! - `checksum`: SHA-256 digests for backup artifacts
//! - `backup`: create, list, validate and prune point-in-time backups
//! - `health`: three ordered, time-bounded consistency checks
//! - `recovery`: restore -> validate -> promote/rollback state machine
//! - `audit`: append-only record of every governed operation
//! - `retention`: scheduled backups with bounded retry and pruning

pub mod audit;
pub mod backup;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod engine;
pub mod health;
pub mod observability;
pub mod recovery;
pub mod retention;
