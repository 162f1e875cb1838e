//! Audit log model and inverse/forward statement generator.

pub mod model;
pub mod statements;

pub use model::{AuditEntry, ChangeKind, ChangePayload};
pub use statements::{generate_statements, NoRelations, RelationResolver, StatementDirection};
