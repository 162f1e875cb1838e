//! Shared handle on one record store database.

use crate::errors::{from_rusqlite, Result};
use crate::records::checked_ident;
use crate::{db, migrations, records};
use driftx_core::audit::RelationResolver;
use driftx_core::errors::{DriftError, ExError, ExErrorKind};
use driftx_core::model::{ColumnKind, Record, TableSchema};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// A migrated SQLite record store behind a mutex
///
/// Every access locks the connection for the duration of one synchronous
/// call; no lock is held across an await point.
#[derive(Debug)]
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Open (creating if needed) and migrate the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut conn = db::open(path.as_ref())?;
        db::configure(&conn)?;
        migrations::apply_migrations(&mut conn)?;
        info!(path = %path.as_ref().display(), "record store opened");
        Ok(Self::from_connection(conn))
    }

    /// Fresh migrated in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = db::open_in_memory()?;
        db::configure(&conn)?;
        migrations::apply_migrations(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| {
            ExError::new(ExErrorKind::Internal)
                .with_op("record_store")
                .with_message("connection mutex poisoned")
        })?;
        f(&mut conn)
    }

    /// Run a batch of SQL (module migrations, fixtures)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch(sql).map_err(from_rusqlite))
    }

    pub fn select_all(&self, schema: &TableSchema) -> Result<Vec<Record>> {
        self.with_conn(|conn| records::select_all(conn, schema))
    }

    pub fn insert(&self, schema: &TableSchema, record: &Record) -> Result<Record> {
        self.with_conn(|conn| records::insert_record(conn, schema, record))
    }

    pub fn update(&self, schema: &TableSchema, desired: &Record, current: &Record) -> Result<Record> {
        self.with_conn(|conn| records::update_record(conn, schema, desired, current))
    }

    pub fn delete(&self, schema: &TableSchema, record: &Record) -> Result<()> {
        self.with_conn(|conn| records::delete_record(conn, schema, record))
    }

    /// Execute generated statements in order inside one transaction
    ///
    /// # Errors
    ///
    /// The first statement that fails, or that touches no row, aborts the
    /// batch and nothing is applied.
    pub fn apply_statements(&self, statements: &[String]) -> Result<usize> {
        let failed = |i: usize, statement: &str, reason: String| {
            ExError::new(ExErrorKind::Persistence)
                .with_op("apply_statements")
                .with_message(format!("statement {} {}: {}", i + 1, reason, statement))
        };
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(from_rusqlite)?;
            for (i, statement) in statements.iter().enumerate() {
                let changed = tx
                    .execute(statement, [])
                    .map_err(|e| failed(i, statement, format!("failed: {}", e)))?;
                if changed == 0 {
                    return Err(failed(i, statement, "matched no rows".to_string()));
                }
            }
            tx.commit().map_err(from_rusqlite)?;
            debug!(statements = statements.len(), "statements applied");
            Ok(statements.len())
        })
    }

    fn lookup_natural_key(
        &self,
        table: &TableSchema,
        natural_key: &str,
        surrogate: &Value,
    ) -> Result<Option<Value>> {
        let table_name = checked_ident(&table.name, &table.name)?;
        let natural = checked_ident(&table.name, natural_key)?;
        let key = checked_ident(&table.name, table.surrogate_key.as_deref().unwrap_or("id"))?;
        let kind = table
            .column_def(natural_key)
            .map(|c| c.kind.clone())
            .unwrap_or(ColumnKind::Scalar);
        let sql = format!("SELECT {} FROM {} WHERE {} = ?", natural, table_name, key);
        let param = records::to_sql_value(&ColumnKind::Scalar, surrogate);

        self.with_conn(|conn| {
            let value = conn
                .query_row(&sql, [param], |row| {
                    Ok(records::from_sql_value(&kind, row.get_ref(0)?))
                })
                .optional()
                .map_err(from_rusqlite)?;
            Ok(value.filter(|v| !v.is_null()))
        })
    }
}

impl RelationResolver for RecordStore {
    fn natural_key(
        &self,
        table: &TableSchema,
        natural_key: &str,
        surrogate: &Value,
    ) -> driftx_core::Result<Option<Value>> {
        self.lookup_natural_key(table, natural_key, surrogate)
            .map_err(DriftError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn network() -> TableSchema {
        TableSchema::new("network")
            .surrogate_key("id")
            .column("name", ColumnKind::Scalar)
            .generated_column("network_id", ColumnKind::Scalar)
            .identity(&["name"])
    }

    #[test]
    fn test_resolver_reads_natural_key() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .execute_batch("CREATE TABLE network (id INTEGER PRIMARY KEY, name TEXT, network_id TEXT)")
            .unwrap();
        let row = store
            .insert(
                &network(),
                &Record::new().with("name", "core").with("network_id", "vpc-1"),
            )
            .unwrap();

        let resolved = store
            .natural_key(&network(), "network_id", row.get("id").unwrap())
            .unwrap();
        assert_eq!(resolved, Some(json!("vpc-1")));
        assert_eq!(
            store.natural_key(&network(), "network_id", &json!(99)).unwrap(),
            None
        );
    }

    #[test]
    fn test_failed_statement_applies_nothing() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .execute_batch("CREATE TABLE network (id INTEGER PRIMARY KEY, name TEXT, network_id TEXT)")
            .unwrap();

        let err = store
            .apply_statements(&[
                "INSERT INTO network (name) VALUES ('a');".to_string(),
                "INSERT INTO nowhere (name) VALUES ('b');".to_string(),
            ])
            .unwrap_err();
        assert_eq!(err.op(), Some("apply_statements"));
        assert!(store.select_all(&network()).unwrap().is_empty());
    }
}
