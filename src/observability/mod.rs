//! Structured logging for graphvault
//!
//! - Structured logs (JSON), one line per event
//! - Deterministic key ordering
//! - Synchronous, no buffering
//!
//! Integrity faults and operator alerts are emitted through this module so
//! monitoring can pick them up from a single stream.

mod logger;

pub use logger::{Logger, Severity};
