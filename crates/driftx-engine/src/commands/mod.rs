//! Command orchestration layer.
//!
//! Coordinates the reconciliation core with the record store.

pub mod engine_command;
pub mod export;
pub mod modules;
pub mod transaction;
