//! Schema-driven row access.
//!
//! Drivers backed by this store can implement their `db_*` operations with
//! these functions instead of hand-written SQL. Rows are addressed by their
//! surrogate key when the record carries one, otherwise by the table's
//! identity columns.

use crate::errors::{from_rusqlite, invalid_identifier, row_not_found, Result};
use driftx_core::model::{ColumnKind, Record, TableSchema};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

/// `name` if it can be spliced into SQL unquoted
pub(crate) fn checked_ident<'a>(table: &str, name: &'a str) -> Result<&'a str> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(invalid_identifier(table, name))
    }
}

fn column_list(schema: &TableSchema) -> Result<String> {
    let names = schema
        .columns
        .iter()
        .map(|c| checked_ident(&schema.name, &c.name))
        .collect::<Result<Vec<_>>>()?;
    Ok(names.join(", "))
}

/// JSON value to SQLite value for a column of `kind`
pub fn to_sql_value(kind: &ColumnKind, value: &Value) -> SqlValue {
    match (kind, value) {
        (_, Value::Null) => SqlValue::Null,
        (ColumnKind::Json | ColumnKind::Array, Value::String(s)) => SqlValue::Text(s.clone()),
        (ColumnKind::Json | ColumnKind::Array, other) => SqlValue::Text(other.to_string()),
        (_, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        (_, Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        (_, Value::String(s)) => SqlValue::Text(s.clone()),
        (_, other) => SqlValue::Text(other.to_string()),
    }
}

/// SQLite value to JSON value for a column of `kind`
///
/// JSON and array columns are parsed back into structured values; text that
/// is not valid JSON stays a string.
pub fn from_sql_value(kind: &ColumnKind, value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            match kind {
                ColumnKind::Json | ColumnKind::Array => {
                    serde_json::from_str(&text).unwrap_or(Value::String(text))
                }
                _ => Value::String(text),
            }
        }
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

fn read_row(schema: &TableSchema, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (i, column) in schema.columns.iter().enumerate() {
        record.set(column.name.clone(), from_sql_value(&column.kind, row.get_ref(i)?));
    }
    Ok(record)
}

/// Every row of the table, in insertion order
pub fn select_all(conn: &Connection, schema: &TableSchema) -> Result<Vec<Record>> {
    let table = checked_ident(&schema.name, &schema.name)?;
    let sql = format!("SELECT {} FROM {} ORDER BY rowid", column_list(schema)?, table);
    let mut stmt = conn.prepare(&sql).map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], |row| read_row(schema, row))
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;
    Ok(rows)
}

fn select_by_rowid(conn: &Connection, schema: &TableSchema, rowid: i64) -> Result<Record> {
    let sql = format!(
        "SELECT {} FROM {} WHERE rowid = ?",
        column_list(schema)?,
        checked_ident(&schema.name, &schema.name)?
    );
    conn.query_row(&sql, [rowid], |row| read_row(schema, row))
        .map_err(from_rusqlite)
}

/// rowid of the row `record` addresses, if present
pub fn find_rowid(conn: &Connection, schema: &TableSchema, record: &Record) -> Result<Option<i64>> {
    let key_columns: Vec<&str> = match &schema.surrogate_key {
        Some(key) if record.get(key).is_some_and(|v| !v.is_null()) => vec![key.as_str()],
        _ if !schema.identity.is_empty() => schema.identity.iter().map(String::as_str).collect(),
        _ => schema.compared_columns().map(|c| c.name.as_str()).collect(),
    };

    let mut conditions = Vec::new();
    let mut params = Vec::new();
    for name in key_columns {
        let column = checked_ident(&schema.name, name)?;
        let kind = schema
            .column_def(name)
            .map(|c| c.kind.clone())
            .unwrap_or(ColumnKind::Scalar);
        match record.get(name) {
            None | Some(Value::Null) => conditions.push(format!("{} IS NULL", column)),
            Some(value) => {
                conditions.push(format!("{} = ?", column));
                params.push(to_sql_value(&kind, value));
            }
        }
    }

    if conditions.is_empty() {
        return Ok(None);
    }
    let sql = format!(
        "SELECT rowid FROM {} WHERE {} LIMIT 1",
        checked_ident(&schema.name, &schema.name)?,
        conditions.join(" AND ")
    );
    conn.query_row(&sql, params_from_iter(params), |row| row.get(0))
        .optional()
        .map_err(from_rusqlite)
}

/// Insert `record`, letting the store assign the surrogate key; returns the
/// stored row
pub fn insert_record(conn: &Connection, schema: &TableSchema, record: &Record) -> Result<Record> {
    let mut columns = Vec::new();
    let mut params = Vec::new();
    for column in &schema.columns {
        if schema.is_surrogate_key(&column.name) {
            continue;
        }
        if let Some(value) = record.get(&column.name).filter(|v| !v.is_null()) {
            columns.push(checked_ident(&schema.name, &column.name)?);
            params.push(to_sql_value(&column.kind, value));
        }
    }

    let table = checked_ident(&schema.name, &schema.name)?;
    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        )
    };
    conn.execute(&sql, params_from_iter(params))
        .map_err(from_rusqlite)?;

    let stored = select_by_rowid(conn, schema, conn.last_insert_rowid())?;
    debug!(table = %schema.name, entity_id = %schema.identity_of(&stored), "row inserted");
    Ok(stored)
}

/// Overwrite the row `current` addresses with the columns `desired` carries
///
/// Surrogate keys are never rewritten. Columns absent from `desired` keep
/// their stored value.
pub fn update_record(
    conn: &Connection,
    schema: &TableSchema,
    desired: &Record,
    current: &Record,
) -> Result<Record> {
    let rowid = find_rowid(conn, schema, current)?
        .ok_or_else(|| row_not_found(&schema.name, &schema.identity_of(current)))?;

    let mut assignments = Vec::new();
    let mut params = Vec::new();
    for column in &schema.columns {
        if schema.is_surrogate_key(&column.name) {
            continue;
        }
        if let Some(value) = desired.get(&column.name) {
            assignments.push(format!("{} = ?", checked_ident(&schema.name, &column.name)?));
            params.push(to_sql_value(&column.kind, value));
        }
    }

    if !assignments.is_empty() {
        params.push(SqlValue::Integer(rowid));
        let sql = format!(
            "UPDATE {} SET {} WHERE rowid = ?",
            checked_ident(&schema.name, &schema.name)?,
            assignments.join(", ")
        );
        conn.execute(&sql, params_from_iter(params))
            .map_err(from_rusqlite)?;
    }

    select_by_rowid(conn, schema, rowid)
}

/// Delete the row `record` addresses
pub fn delete_record(conn: &Connection, schema: &TableSchema, record: &Record) -> Result<()> {
    let rowid = find_rowid(conn, schema, record)?
        .ok_or_else(|| row_not_found(&schema.name, &schema.identity_of(record)))?;
    conn.execute(
        &format!(
            "DELETE FROM {} WHERE rowid = ?",
            checked_ident(&schema.name, &schema.name)?
        ),
        [rowid],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("network")
            .surrogate_key("id")
            .column("name", ColumnKind::Scalar)
            .column("tags", ColumnKind::Json)
            .generated_column("network_id", ColumnKind::Scalar)
            .identity(&["name"])
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE network (id INTEGER PRIMARY KEY, name TEXT, tags TEXT, network_id TEXT)",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_identifiers_are_checked() {
        assert!(checked_ident("t", "subnet_id").is_ok());
        assert!(checked_ident("t", "1abc").is_err());
        assert!(checked_ident("t", "name; DROP TABLE x").is_err());
    }

    #[test]
    fn test_insert_update_delete_cycle() {
        let conn = conn();
        let schema = schema();

        let stored = insert_record(
            &conn,
            &schema,
            &Record::new().with("name", "core").with("tags", json!({"env": "prod"})),
        )
        .unwrap();
        assert_eq!(stored.get("id"), Some(&json!(1)));
        assert_eq!(stored.get("tags"), Some(&json!({"env": "prod"})));

        let updated = update_record(
            &conn,
            &schema,
            &Record::new().with("name", "core").with("network_id", "vpc-1"),
            &Record::new().with("name", "core"),
        )
        .unwrap();
        assert_eq!(updated.get_str("network_id"), Some("vpc-1"));
        assert_eq!(updated.get("tags"), Some(&json!({"env": "prod"})));

        delete_record(&conn, &schema, &updated).unwrap();
        assert!(select_all(&conn, &schema).unwrap().is_empty());
    }

    #[test]
    fn test_missing_row_is_not_found() {
        let conn = conn();
        let err = delete_record(&conn, &schema(), &Record::new().with("name", "ghost")).unwrap_err();
        assert_eq!(err.entity_id(), Some("ghost"));
    }
}
