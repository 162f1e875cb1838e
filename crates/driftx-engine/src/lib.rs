//! driftx engine - orchestration layer
//!
//! Wires the reconciliation core to a record store:
//! - `begin` / `commit` / `rollback` with audit-log bracketing
//! - module install / uninstall
//! - transaction SQL export
//! - TOML configuration

pub mod commands;
pub mod config;

pub use commands::engine_command::{apply_engine_command, EngineCommand, EngineCommandResult};
pub use commands::export::export_transaction_sql;
pub use commands::modules::{InstallOptions, InstallResult, UninstallResult};
pub use commands::transaction::{
    BeginResult, CommitOptions, CommitPath, CommitResult, RollbackResult, TransactionController,
};
pub use config::EngineConfig;
