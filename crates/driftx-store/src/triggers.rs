//! Change-capture triggers.
//!
//! Each resource table gets three `AFTER` triggers that append one
//! `audit_log` row per mutated row, stamped with the actor and transaction
//! id held in `audit_context`:
//!
//! | trigger | `change_json`                          |
//! |---------|----------------------------------------|
//! | INSERT  | `{"change": NEW}`                      |
//! | UPDATE  | `{"original": OLD, "change": NEW}`     |
//! | DELETE  | `{"original": OLD}`                    |

use crate::errors::{from_rusqlite, Result};
use crate::records::checked_ident;
use driftx_core::model::{ColumnKind, TableSchema};
use rusqlite::Connection;
use tracing::debug;

const EVENTS: [(&str, &str); 3] = [
    ("insert", "INSERT"),
    ("update", "UPDATE"),
    ("delete", "DELETE"),
];

fn trigger_name(table: &str, event: &str) -> String {
    format!("driftx_audit_{}_{}", table, event)
}

/// `json_object(...)` over every column of the `alias` row
fn row_json(schema: &TableSchema, alias: &str) -> Result<String> {
    let mut pairs = Vec::new();
    for column in &schema.columns {
        let name = checked_ident(&schema.name, &column.name)?;
        let value = match column.kind {
            ColumnKind::Json | ColumnKind::Array => format!(
                "json(CASE WHEN json_valid({a}.{n}) THEN {a}.{n} ELSE json_quote({a}.{n}) END)",
                a = alias,
                n = name
            ),
            _ => format!("{}.{}", alias, name),
        };
        pairs.push(format!("'{}', {}", name, value));
    }
    Ok(format!("json_object({})", pairs.join(", ")))
}

/// `CREATE TRIGGER` statements for `schema`
pub fn trigger_sql(schema: &TableSchema) -> Result<Vec<String>> {
    let table = checked_ident(&schema.name, &schema.name)?;
    let new_row = row_json(schema, "NEW")?;
    let old_row = row_json(schema, "OLD")?;

    EVENTS
        .iter()
        .map(|(event, kind)| {
            let (timing, payload) = match *kind {
                "INSERT" => ("AFTER INSERT", format!("json_object('change', {})", new_row)),
                "UPDATE" => (
                    "AFTER UPDATE",
                    format!(
                        "json_object('original', {}, 'change', {})",
                        old_row, new_row
                    ),
                ),
                _ => ("AFTER DELETE", format!("json_object('original', {})", old_row)),
            };
            Ok(format!(
                "CREATE TRIGGER IF NOT EXISTS {name} {timing} ON {table}
BEGIN
    INSERT INTO audit_log (ts, actor, table_name, change_kind, change_json, transaction_id)
    SELECT strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), actor, '{table}', '{kind}', {payload}, transaction_id
    FROM audit_context WHERE id = 1;
END;",
                name = trigger_name(table, event),
                timing = timing,
                table = table,
                kind = kind,
                payload = payload,
            ))
        })
        .collect()
}

/// Create the change-capture triggers for `schema`
pub fn install_triggers(conn: &Connection, schema: &TableSchema) -> Result<()> {
    for sql in trigger_sql(schema)? {
        conn.execute_batch(&sql).map_err(from_rusqlite)?;
    }
    debug!(table = %schema.name, "change-capture triggers installed");
    Ok(())
}

/// Drop the change-capture triggers for `schema`, if present
pub fn drop_triggers(conn: &Connection, schema: &TableSchema) -> Result<()> {
    let table = checked_ident(&schema.name, &schema.name)?;
    for (event, _) in EVENTS {
        conn.execute_batch(&format!(
            "DROP TRIGGER IF EXISTS {};",
            trigger_name(table, event)
        ))
        .map_err(from_rusqlite)?;
    }
    debug!(table = %schema.name, "change-capture triggers dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_log::{query, AuditQuery};
    use crate::migrations::apply_migrations;
    use driftx_core::audit::ChangeKind;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("person")
            .surrogate_key("id")
            .column("name", ColumnKind::Scalar)
            .column("tags", ColumnKind::Array)
    }

    #[test]
    fn test_triggers_capture_snapshots() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        conn.execute_batch("CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT, tags TEXT)")
            .unwrap();
        install_triggers(&conn, &schema()).unwrap();

        conn.execute_batch(
            "INSERT INTO person (name, tags) VALUES ('x', '[\"a\"]');
             UPDATE person SET name = 'y';
             DELETE FROM person;",
        )
        .unwrap();

        let entries = query(&conn, &AuditQuery::row_changes()).unwrap();
        let kinds: Vec<ChangeKind> = entries.iter().map(|e| e.change_kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
        );

        let inserted = entries[0].change.change.as_ref().unwrap();
        assert_eq!(inserted.get("id"), Some(&json!(1)));
        assert_eq!(inserted.get("tags"), Some(&json!(["a"])));
        assert_eq!(
            entries[1].change.original.as_ref().unwrap().get_str("name"),
            Some("x")
        );
        assert!(entries[2].change.change.is_none());
        assert_eq!(entries[2].actor, "driftx");
    }

    #[test]
    fn test_drop_stops_capture() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        conn.execute_batch("CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT, tags TEXT)")
            .unwrap();
        install_triggers(&conn, &schema()).unwrap();
        drop_triggers(&conn, &schema()).unwrap();

        conn.execute_batch("INSERT INTO person (name) VALUES ('x')")
            .unwrap();
        assert!(query(&conn, &AuditQuery::row_changes()).unwrap().is_empty());
    }
}
