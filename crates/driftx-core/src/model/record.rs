use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One entity row, column name to JSON value
///
/// Records are plain values: relations are stored as references (the
/// referenced row's key), never embedded. Columns are kept ordered so that
/// rendering and hashing are deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Record {
    columns: BTreeMap<String, Value>,
}

impl Record {
    /// Create a new empty record
    pub fn new() -> Self {
        Self {
            columns: BTreeMap::new(),
        }
    }

    /// Builder-style column assignment
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// Get a column value
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Get a column value as a string slice, if it is a JSON string
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.columns.get(column).and_then(Value::as_str)
    }

    /// Set a column value
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    /// Remove a column
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    /// Copy every column of `other` over this record
    ///
    /// Used to fold values returned by the authoritative side (generated
    /// identifiers, timestamps) back into an in-memory record.
    pub fn merge_from(&mut self, other: &Record) {
        for (k, v) in &other.columns {
            self.columns.insert(k.clone(), v.clone());
        }
    }

    /// Iterate columns in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.columns.iter()
    }

    /// Number of columns present
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the record has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(columns: BTreeMap<String, Value>) -> Self {
        Self { columns }
    }
}

impl From<serde_json::Map<String, Value>> for Record {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self {
            columns: map.into_iter().collect(),
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_from_overwrites_and_adds() {
        let mut declared = Record::new()
            .with("name", "net-1")
            .with("cidr", "10.0.0.0/16");
        let returned = Record::new()
            .with("name", "net-1")
            .with("network_id", "vpc-0abc");

        declared.merge_from(&returned);

        assert_eq!(declared.get_str("network_id"), Some("vpc-0abc"));
        assert_eq!(declared.get_str("cidr"), Some("10.0.0.0/16"));
        assert_eq!(declared.len(), 3);
    }

    #[test]
    fn test_serializes_as_flat_object() {
        let record = Record::new().with("b", 2).with("a", "x");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, json!({"a": "x", "b": 2}));

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
