//! Resource driver interface and per-pass caches.
//!
//! A driver translates one resource table between the record store and the
//! provider API. The reconciliation loop calls drivers without knowing what
//! provider or schema is behind them.

use crate::errors::DriverError;
use crate::model::{Record, TableSchema};
use async_trait::async_trait;
use driftx_core_types::RequestContext;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// How a changed entity pair is brought into agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrReplace {
    /// Mutate in place
    Update,
    /// Delete the stale entity and create the desired one
    Replace,
}

/// Records of one table with an identity index
#[derive(Debug, Clone, Default)]
pub struct TableSnapshot {
    records: Vec<Record>,
    by_identity: HashMap<String, usize>,
}

impl TableSnapshot {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, identity: &str) -> Option<&Record> {
        self.by_identity.get(identity).map(|&i| &self.records[i])
    }

    /// First record whose `column` equals `value`
    pub fn find_by(&self, column: &str, value: &Value) -> Option<&Record> {
        self.records.iter().find(|r| r.get(column) == Some(value))
    }
}

/// One side (declared or observed) of every table in a pass
///
/// Built fresh for each inner iteration and dropped afterwards; never
/// reused across iterations.
#[derive(Debug, Clone, Default)]
pub struct TableIndex {
    tables: HashMap<String, TableSnapshot>,
}

impl TableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `records` of `table` by identity
    pub fn insert_table<F>(&mut self, table: &str, records: Vec<Record>, identity: F)
    where
        F: Fn(&Record) -> String,
    {
        let by_identity = records
            .iter()
            .enumerate()
            .map(|(i, r)| (identity(r), i))
            .collect();
        self.tables.insert(
            table.to_string(),
            TableSnapshot {
                records,
                by_identity,
            },
        );
    }

    pub fn table(&self, table: &str) -> Option<&TableSnapshot> {
        self.tables.get(table)
    }

    pub fn get(&self, table: &str, identity: &str) -> Option<&Record> {
        self.tables.get(table).and_then(|t| t.get(identity))
    }

    pub fn find_by(&self, table: &str, column: &str, value: &Value) -> Option<&Record> {
        self.tables.get(table).and_then(|t| t.find_by(column, value))
    }
}

/// Context handed to every driver call in one inner iteration
///
/// Relations are resolved through the two indexes instead of re-fetching
/// related entities.
#[derive(Debug, Clone)]
pub struct PassContext {
    pub request: RequestContext,
    /// Inner iteration number, starting at 1; 0 for snapshot reads
    pub iteration: usize,
    /// Record store side
    pub declared: Arc<TableIndex>,
    /// Provider side
    pub observed: Arc<TableIndex>,
}

impl PassContext {
    /// Context for snapshot reads, before any index exists
    pub fn for_read(request: RequestContext, iteration: usize) -> Self {
        Self {
            request,
            iteration,
            declared: Arc::new(TableIndex::new()),
            observed: Arc::new(TableIndex::new()),
        }
    }
}

/// Per-table bridge between the record store and the provider
///
/// The identity and equality defaults come from the table's
/// [`TableSchema`]; drivers override them when the provider needs a
/// different notion of "same" entity.
#[async_trait]
pub trait ResourceDriver: Send + Sync {
    fn schema(&self) -> &TableSchema;

    fn table(&self) -> &str {
        &self.schema().name
    }

    /// Deterministic identity from semantically unique fields
    fn identity(&self, record: &Record) -> String {
        self.schema().identity_of(record)
    }

    /// Must ignore fields the provider assigns
    fn equals(&self, declared: &Record, observed: &Record) -> bool {
        self.schema().records_equal(declared, observed)
    }

    fn update_or_replace(&self, _declared: &Record, _observed: &Record) -> UpdateOrReplace {
        UpdateOrReplace::Update
    }

    /// Plan entry description
    fn describe(&self, record: &Record) -> String {
        format!("{} {}", self.table(), self.identity(record))
    }

    async fn db_read(&self, ctx: &PassContext, id: Option<&str>) -> Result<Vec<Record>, DriverError>;

    /// Returns the stored row, including store-assigned columns
    async fn db_create(&self, ctx: &PassContext, record: &Record) -> Result<Record, DriverError>;

    async fn db_update(
        &self,
        ctx: &PassContext,
        desired: &Record,
        current: &Record,
    ) -> Result<Record, DriverError>;

    async fn db_delete(&self, ctx: &PassContext, record: &Record) -> Result<(), DriverError>;

    async fn cloud_read(&self, ctx: &PassContext, id: Option<&str>)
        -> Result<Vec<Record>, DriverError>;

    /// Returns the entity as the provider reports it, generated fields included
    async fn cloud_create(&self, ctx: &PassContext, record: &Record)
        -> Result<Record, DriverError>;

    async fn cloud_update(
        &self,
        ctx: &PassContext,
        desired: &Record,
        current: &Record,
    ) -> Result<Record, DriverError>;

    async fn cloud_delete(&self, ctx: &PassContext, record: &Record) -> Result<(), DriverError>;
}
