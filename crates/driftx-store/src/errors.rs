//! Store failures, all reported as `ExError`

use driftx_core::errors::{ExError, ExErrorKind};

pub type Result<T> = std::result::Result<T, ExError>;

fn persistence(op: &str, message: String) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op(op.to_string())
        .with_message(message)
}

/// Any rusqlite failure without a more specific mapping
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    persistence("sqlite", err.to_string())
}

pub fn migration_error(migration_id: &str, reason: &str) -> ExError {
    persistence("migration", format!("{migration_id}: {reason}"))
}

/// Recorded checksum of an applied migration differs from the embedded SQL
pub fn checksum_mismatch(migration_id: &str, recorded: &str, embedded: &str) -> ExError {
    persistence(
        "migration_checksum",
        format!("{migration_id} was applied as {recorded} but now hashes to {embedded}"),
    )
}

/// A JSON column could not be read or written
pub fn serialization_error(op: &str, err: serde_json::Error) -> ExError {
    ExError::new(ExErrorKind::Serialization)
        .with_op(op.to_string())
        .with_message(err.to_string())
}

/// Table or column names are spliced into SQL, so only plain identifiers pass
pub fn invalid_identifier(table: &str, identifier: &str) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op("schema")
        .with_table(table.to_string())
        .with_message(format!("invalid SQL identifier: {identifier:?}"))
}

pub fn row_not_found(table: &str, identity: &str) -> ExError {
    ExError::new(ExErrorKind::NotFound)
        .with_table(table.to_string())
        .with_entity_id(identity.to_string())
        .with_message("row not found")
}
