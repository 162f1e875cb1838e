//! Transaction SQL export.
//!
//! Renders the open transaction's row changes as forward statements: the
//! SQL that would reproduce the transaction against another record store.

use crate::commands::transaction::TransactionController;
use driftx_core::audit::{generate_statements, StatementDirection};
use driftx_core::errors::{DriftError, Result};
use driftx_core::registry::ModuleRegistry;
use driftx_store::audit_log::{self, AuditQuery};
use driftx_store::RecordStore;
use tracing::debug;

/// Forward statements for every row change since the last `OPEN_TXN`.
///
/// # Errors
///
/// - `NoOpenTransaction` when no transaction is open
/// - `InvalidAuditEntry` when an entry's table has no registered schema
pub fn export_transaction_sql(registry: &ModuleRegistry, store: &RecordStore) -> Result<Vec<String>> {
    let entries = store
        .with_conn(|conn| match audit_log::open_transaction(conn)? {
            Some(marker) => {
                audit_log::query(conn, &AuditQuery::row_changes().after(marker.id)).map(Some)
            }
            None => Ok(None),
        })?
        .ok_or(DriftError::NoOpenTransaction)?;

    let statements = generate_statements(
        &entries,
        &registry.table_schemas(),
        store,
        StatementDirection::Forward,
    )?;
    debug!(
        op = "export_transaction_sql",
        entries = entries.len(),
        statements = statements.len(),
        "transaction rendered"
    );
    Ok(statements)
}

impl TransactionController {
    /// See [`export_transaction_sql`]
    ///
    /// # Errors
    ///
    /// `NoOpenTransaction` when no transaction is open.
    pub fn export_transaction_sql(&self) -> Result<Vec<String>> {
        export_transaction_sql(&self.registry, &self.store)
    }
}
