//! driftx core - reconciliation engine kernel
//!
//! This crate holds the provider- and storage-agnostic parts of driftx:
//! - Record and table schema model, module descriptors
//! - Module registry with the dependency sorter
//! - Identity-keyed diff engine and Crupde plans
//! - Concurrent retrying executor ("lazy loader")
//! - Resource driver interface and the apply/sync reconciliation loop
//! - Audit log model with the inverse/forward statement generator
//! - Structured error and logging facilities

pub mod audit;
pub mod diff;
pub mod driver;
pub mod errors;
pub mod lazy_loader;
pub mod logging_facility;
pub mod model;
pub mod plan;
pub mod reconcile;
pub mod registry;

// Re-export commonly used types
pub use audit::{AuditEntry, ChangeKind, ChangePayload, StatementDirection};
pub use diff::{diff, Delta};
pub use driver::{PassContext, ResourceDriver, UpdateOrReplace};
pub use errors::{DriftError, DriverError, ExError, ExErrorKind, Result};
pub use lazy_loader::{run_lazy, LazyAction};
pub use model::{ColumnKind, ModuleDescriptor, Record, TableSchema};
pub use plan::{CrupdePlan, PlanEntry};
pub use reconcile::{reconcile, Direction, ReconcileOptions, ReconcileOutcome};
pub use registry::ModuleRegistry;
