//! Statement generation from audit log entries.
//!
//! The same renderer produces both directions:
//!
//! | entry    | inverse                                | forward                          |
//! |----------|----------------------------------------|----------------------------------|
//! | `INSERT` | `DELETE ... WHERE <new values>`        | `INSERT ... VALUES <new values>` |
//! | `DELETE` | `INSERT ... VALUES <old values>`       | `DELETE ... WHERE <old values>`  |
//! | `UPDATE` | `UPDATE ... SET <old> WHERE <new>`     | `UPDATE ... SET <new> WHERE <old>` |
//!
//! Surrogate keys are never rendered: they are not stable across row
//! reconstruction. Relation columns are rendered as a sub-select on the
//! referenced row's natural (provider-assigned) key. JSON and array columns
//! are matched on their normalized JSON form, the same form the
//! change-capture triggers record, so whitespace in the stored text does not
//! matter.

use crate::audit::model::{AuditEntry, ChangeKind};
use crate::errors::{DriftError, Result};
use crate::model::{ColumnDef, ColumnKind, Record, TableSchema};
use serde_json::Value;
use tracing::warn;

/// Which way statements replay the entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementDirection {
    /// Undo the entries, newest first
    Inverse,
    /// Reproduce the entries, oldest first
    Forward,
}

/// Looks up a referenced row's natural key when the audit window holds no
/// snapshot of it
pub trait RelationResolver {
    fn natural_key(
        &self,
        table: &TableSchema,
        natural_key: &str,
        surrogate: &Value,
    ) -> Result<Option<Value>>;
}

/// Resolver that never finds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRelations;

impl RelationResolver for NoRelations {
    fn natural_key(&self, _: &TableSchema, _: &str, _: &Value) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// Statements for `entries`, which must be ordered oldest first.
///
/// Bracket markers and error records are skipped.
///
/// # Errors
///
/// `InvalidAuditEntry` when a row entry lacks its table, its schema or a
/// snapshot its kind requires.
pub fn generate_statements(
    entries: &[AuditEntry],
    schemas: &[&TableSchema],
    resolver: &dyn RelationResolver,
    direction: StatementDirection,
) -> Result<Vec<String>> {
    let renderer = Renderer {
        entries,
        schemas,
        resolver,
    };

    let rows = entries.iter().filter(|e| e.change_kind.is_row_change());
    let ordered: Vec<&AuditEntry> = match direction {
        StatementDirection::Forward => rows.collect(),
        StatementDirection::Inverse => rows.rev().collect(),
    };

    ordered
        .into_iter()
        .map(|entry| renderer.statement(entry, direction))
        .collect()
}

struct Renderer<'a> {
    entries: &'a [AuditEntry],
    schemas: &'a [&'a TableSchema],
    resolver: &'a dyn RelationResolver,
}

impl Renderer<'_> {
    fn schema(&self, entry: &AuditEntry, table: &str) -> Result<&TableSchema> {
        self.schemas
            .iter()
            .find(|s| s.name == table)
            .copied()
            .ok_or_else(|| DriftError::InvalidAuditEntry {
                entry_id: entry.id,
                reason: format!("no schema registered for table {}", table),
            })
    }

    fn statement(&self, entry: &AuditEntry, direction: StatementDirection) -> Result<String> {
        let table = entry.table()?;
        let schema = self.schema(entry, table)?;

        match (entry.change_kind, direction) {
            (ChangeKind::Insert, StatementDirection::Inverse) => {
                let row = entry.require(&entry.change.change, "change")?;
                self.delete(schema, row)
            }
            (ChangeKind::Insert, StatementDirection::Forward) => {
                let row = entry.require(&entry.change.change, "change")?;
                self.insert(schema, row)
            }
            (ChangeKind::Delete, StatementDirection::Inverse) => {
                let row = entry.require(&entry.change.original, "original")?;
                self.insert(schema, row)
            }
            (ChangeKind::Delete, StatementDirection::Forward) => {
                let row = entry.require(&entry.change.original, "original")?;
                self.delete(schema, row)
            }
            (ChangeKind::Update, direction) => {
                let original = entry.require(&entry.change.original, "original")?;
                let current = entry.require(&entry.change.change, "change")?;
                match direction {
                    StatementDirection::Inverse => self.update(schema, original, current),
                    StatementDirection::Forward => self.update(schema, current, original),
                }
            }
            (kind, _) => Err(DriftError::Internal {
                message: format!("{} is not a row change", kind),
            }),
        }
    }

    /// `DELETE` keyed by every non-null rendered column
    fn delete(&self, schema: &TableSchema, row: &Record) -> Result<String> {
        let mut conditions = Vec::new();
        for column in rendered_columns(schema) {
            match row.get(&column.name) {
                None | Some(Value::Null) => continue,
                Some(value) => conditions.push(self.condition(column, value)?),
            }
        }
        Ok(format!(
            "DELETE FROM {} WHERE {};",
            schema.name,
            where_clause(conditions)
        ))
    }

    fn insert(&self, schema: &TableSchema, row: &Record) -> Result<String> {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for column in rendered_columns(schema) {
            match row.get(&column.name) {
                None | Some(Value::Null) => continue,
                Some(value) => {
                    columns.push(column.name.as_str());
                    values.push(self.render(column, value)?);
                }
            }
        }
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({});",
            schema.name,
            columns.join(", "),
            values.join(", ")
        ))
    }

    /// `UPDATE` setting `target` on the row currently matching `matching`
    fn update(&self, schema: &TableSchema, target: &Record, matching: &Record) -> Result<String> {
        let mut assignments = Vec::new();
        let mut conditions = Vec::new();
        for column in rendered_columns(schema) {
            let to = target.get(&column.name).unwrap_or(&Value::Null);
            assignments.push(format!("{} = {}", column.name, self.render(column, to)?));

            match matching.get(&column.name).unwrap_or(&Value::Null) {
                Value::Null => conditions.push(format!("{} IS NULL", column.name)),
                value => conditions.push(self.condition(column, value)?),
            }
        }
        Ok(format!(
            "UPDATE {} SET {} WHERE {};",
            schema.name,
            assignments.join(", "),
            where_clause(conditions)
        ))
    }

    /// `column = value` for a non-null value
    fn condition(&self, column: &ColumnDef, value: &Value) -> Result<String> {
        match column.kind {
            ColumnKind::Json | ColumnKind::Array => Ok(format!(
                "{} = json({})",
                normalized_json(&column.name),
                quote(&value.to_string())
            )),
            _ => Ok(format!("{} = {}", column.name, self.render(column, value)?)),
        }
    }

    fn render(&self, column: &ColumnDef, value: &Value) -> Result<String> {
        if value.is_null() {
            return Ok("NULL".to_string());
        }
        match &column.kind {
            ColumnKind::Scalar => Ok(render_scalar(value)),
            // text that was not JSON was captured as a JSON string; restore it raw
            ColumnKind::Json | ColumnKind::Array => Ok(match value {
                Value::String(s) => quote(s),
                other => quote(&other.to_string()),
            }),
            ColumnKind::Relation { table, natural_key } => {
                self.render_relation(table, natural_key, value)
            }
        }
    }

    fn render_relation(&self, table: &str, natural_key: &str, surrogate: &Value) -> Result<String> {
        let referenced = self.schemas.iter().find(|s| s.name == table).copied();
        let key_column = referenced
            .and_then(|s| s.surrogate_key.as_deref())
            .unwrap_or("id");

        let natural = match self.natural_from_window(table, key_column, natural_key, surrogate) {
            Some(v) => Some(v),
            None => match referenced {
                Some(schema) => self.resolver.natural_key(schema, natural_key, surrogate)?,
                None => None,
            },
        };

        match natural {
            Some(natural) if !natural.is_null() => Ok(format!(
                "(SELECT {} FROM {} WHERE {} = {})",
                key_column,
                table,
                natural_key,
                render_scalar(&natural)
            )),
            _ => {
                warn!(
                    table = table,
                    natural_key = natural_key,
                    surrogate = %surrogate,
                    "natural key unresolved; rendering surrogate value"
                );
                Ok(render_scalar(surrogate))
            }
        }
    }

    /// Natural key of the referenced row from any snapshot in the window
    fn natural_from_window(
        &self,
        table: &str,
        key_column: &str,
        natural_key: &str,
        surrogate: &Value,
    ) -> Option<Value> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.table_name.as_deref() == Some(table))
            .flat_map(|e| [e.change.change.as_ref(), e.change.original.as_ref()])
            .flatten()
            .filter(|row| row.get(key_column) == Some(surrogate))
            .find_map(|row| row.get(natural_key).filter(|v| !v.is_null()).cloned())
    }
}

fn rendered_columns(schema: &TableSchema) -> impl Iterator<Item = &ColumnDef> {
    schema
        .columns
        .iter()
        .filter(move |c| !schema.is_surrogate_key(&c.name))
}

fn where_clause(conditions: Vec<String>) -> String {
    if conditions.is_empty() {
        "1 = 0".to_string()
    } else {
        conditions.join(" AND ")
    }
}

/// Column text as the change-capture triggers record it
fn normalized_json(column: &str) -> String {
    format!(
        "json(CASE WHEN json_valid({c}) THEN {c} ELSE json_quote({c}) END)",
        c = column
    )
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => quote(s),
        Value::Array(_) | Value::Object(_) => quote(&value.to_string()),
        other => other.to_string(),
    }
}
