#![allow(dead_code)]

use driftx_core::model::{ColumnKind, TableSchema};
use driftx_store::{triggers, RecordStore};
use tempfile::TempDir;

/// Record store in a scratch directory; keep the `TempDir` alive
pub fn file_store() -> (TempDir, RecordStore) {
    let dir = TempDir::new().expect("temp dir");
    let store = RecordStore::open(dir.path().join("driftx.db")).expect("open store");
    (dir, store)
}

pub fn network_schema() -> TableSchema {
    TableSchema::new("network")
        .surrogate_key("id")
        .column("name", ColumnKind::Scalar)
        .column("cidr", ColumnKind::Scalar)
        .generated_column("network_id", ColumnKind::Scalar)
        .identity(&["name"])
}

pub fn subnet_schema() -> TableSchema {
    TableSchema::new("subnet")
        .surrogate_key("id")
        .column("name", ColumnKind::Scalar)
        .relation("network", "network", "network_id")
        .column("tags", ColumnKind::Json)
        .identity(&["name"])
}

/// Create the resource tables and their change-capture triggers
pub fn install_tables(store: &RecordStore) {
    store
        .execute_batch(
            "CREATE TABLE network (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, cidr TEXT, network_id TEXT);
             CREATE TABLE subnet (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, network INTEGER REFERENCES network(id), tags TEXT);",
        )
        .expect("create tables");
    store
        .with_conn(|conn| {
            triggers::install_triggers(conn, &network_schema())?;
            triggers::install_triggers(conn, &subnet_schema())
        })
        .expect("install triggers");
}
