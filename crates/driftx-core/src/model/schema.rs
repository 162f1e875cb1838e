//! Per-table schema descriptors
//!
//! A [`TableSchema`] lists every column of a resource table with a kind tag.
//! Generic code (identity, equality, change-capture triggers, statement
//! rendering) reads the descriptor instead of introspecting values.

use crate::model::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a column's values are stored and rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    /// String, number, boolean or null
    Scalar,
    /// Ordered list of scalars
    Array,
    /// Arbitrary JSON document
    Json,
    /// Surrogate key of a row in another table
    ///
    /// `natural_key` names the referenced table's cloud-assigned identity
    /// column, which stays stable when the referenced row is recreated.
    Relation { table: String, natural_key: String },
}

/// One column of a resource table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    /// Assigned by the provider or the store; the declared side cannot know it in advance
    pub generated: bool,
}

/// Descriptor of one resource table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Columns whose values make an entity semantically unique
    pub identity: Vec<String>,
    /// Store-assigned row key, unstable across row reconstruction
    pub surrogate_key: Option<String>,
}

impl TableSchema {
    /// Start a schema for the named table
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            identity: Vec::new(),
            surrogate_key: None,
        }
    }

    /// Add a column the declared side owns
    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            kind,
            generated: false,
        });
        self
    }

    /// Add a provider/store assigned column
    pub fn generated_column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            kind,
            generated: true,
        });
        self
    }

    /// Add a relation column pointing at `table`, resolved through its `natural_key`
    pub fn relation(
        self,
        name: impl Into<String>,
        table: impl Into<String>,
        natural_key: impl Into<String>,
    ) -> Self {
        self.column(
            name,
            ColumnKind::Relation {
                table: table.into(),
                natural_key: natural_key.into(),
            },
        )
    }

    /// Declare the identity columns
    pub fn identity(mut self, columns: &[&str]) -> Self {
        self.identity = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Declare the surrogate key, adding it as a generated scalar column if absent
    pub fn surrogate_key(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if self.column_def(&column).is_none() {
            self.columns.insert(
                0,
                ColumnDef {
                    name: column.clone(),
                    kind: ColumnKind::Scalar,
                    generated: true,
                },
            );
        }
        self.surrogate_key = Some(column);
        self
    }

    /// Look up a column by name
    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in declaration order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Whether `column` is the surrogate key
    pub fn is_surrogate_key(&self, column: &str) -> bool {
        self.surrogate_key.as_deref() == Some(column)
    }

    /// Identity string for a record
    ///
    /// Identity columns are joined with `|`; a table without declared
    /// identity falls back to every non-generated column. Must be injective
    /// over the table's valid entities.
    pub fn identity_of(&self, record: &Record) -> String {
        let parts: Vec<String> = if self.identity.is_empty() {
            self.compared_columns()
                .map(|c| identity_part(record.get(&c.name)))
                .collect()
        } else {
            self.identity
                .iter()
                .map(|c| identity_part(record.get(c)))
                .collect()
        };
        parts.join("|")
    }

    /// Columns that take part in default equality
    pub fn compared_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(move |c| !c.generated && !self.is_surrogate_key(&c.name))
    }

    /// Default equality: every non-generated column matches
    ///
    /// A missing column equals an explicit null.
    pub fn records_equal(&self, declared: &Record, observed: &Record) -> bool {
        self.compared_columns().all(|c| {
            let a = declared.get(&c.name).unwrap_or(&Value::Null);
            let b = observed.get(&c.name).unwrap_or(&Value::Null);
            a == b
        })
    }
}

fn identity_part(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subnet_schema() -> TableSchema {
        TableSchema::new("subnet")
            .surrogate_key("id")
            .column("cidr", ColumnKind::Scalar)
            .column("tags", ColumnKind::Json)
            .generated_column("subnet_id", ColumnKind::Scalar)
            .relation("network_id", "network", "network_id")
            .identity(&["cidr"])
    }

    #[test]
    fn test_surrogate_key_added_first_and_generated() {
        let schema = subnet_schema();
        let first = &schema.columns[0];
        assert_eq!(first.name, "id");
        assert!(first.generated);
        assert!(schema.is_surrogate_key("id"));
    }

    #[test]
    fn test_identity_uses_declared_columns() {
        let schema = subnet_schema();
        let record = Record::new().with("cidr", "10.0.1.0/24").with("id", 7);
        assert_eq!(schema.identity_of(&record), "10.0.1.0/24");
    }

    #[test]
    fn test_equality_ignores_generated_columns() {
        let schema = subnet_schema();
        let declared = Record::new()
            .with("cidr", "10.0.1.0/24")
            .with("tags", json!({"env": "dev"}))
            .with("network_id", 1);
        let observed = declared
            .clone()
            .with("id", 99)
            .with("subnet_id", "subnet-123");

        assert!(schema.records_equal(&declared, &observed));

        let drifted = observed.with("tags", json!({"env": "prod"}));
        assert!(!schema.records_equal(&declared, &drifted));
    }

    #[test]
    fn test_identity_falls_back_to_compared_columns() {
        let schema = TableSchema::new("tag")
            .column("key", ColumnKind::Scalar)
            .column("value", ColumnKind::Scalar);
        let record = Record::new().with("key", "env").with("value", "dev");
        assert_eq!(schema.identity_of(&record), "env|dev");
    }
}
