//! driftx store - SQLite record store
//!
//! Provides:
//! - Embedded, checksummed schema migrations
//! - The append-only audit log with its change-capture triggers
//! - Audit reader and bracket-marker writer used by the transaction controller
//! - Schema-driven row access for store-backed drivers
//! - Installed-module bookkeeping

pub mod audit_log;
pub mod db;
pub mod errors;
pub mod migrations;
pub mod modules;
pub mod record_store;
pub mod records;
pub mod triggers;

// Re-export key types
pub use audit_log::AuditQuery;
pub use errors::Result;
pub use modules::InstalledModule;
pub use record_store::RecordStore;
