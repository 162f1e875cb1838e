#![allow(dead_code)]

use async_trait::async_trait;
use driftx_core::driver::{PassContext, ResourceDriver, UpdateOrReplace};
use driftx_core::errors::DriverError;
use driftx_core::model::{ColumnKind, ModuleDescriptor, Record, TableSchema};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// `network` table keyed by its `id` column, with a provider-assigned `network_id`
pub fn network_schema() -> TableSchema {
    TableSchema::new("network")
        .column("id", ColumnKind::Scalar)
        .column("cidr", ColumnKind::Scalar)
        .generated_column("network_id", ColumnKind::Scalar)
        .identity(&["id"])
}

pub fn network(id: &str, cidr: &str) -> Record {
    Record::new().with("id", id).with("cidr", cidr)
}

/// Driver keeping both sides in memory and recording every mutating call
pub struct MemoryDriver {
    schema: TableSchema,
    pub store: Mutex<Vec<Record>>,
    pub cloud: Mutex<Vec<Record>>,
    calls: Mutex<Vec<String>>,
    /// Remaining injected `cloud_create` failures per identity
    create_failures: Mutex<HashMap<String, usize>>,
    always_fail_create: AtomicBool,
    replace_on_change: AtomicBool,
    next_generated: AtomicUsize,
    /// Remaining injected `cloud_read` failures; `usize::MAX` never recovers
    read_failures: AtomicUsize,
    /// Provider rewrites every `cidr` on each read
    drifting: AtomicBool,
    cloud_reads: AtomicUsize,
}

impl MemoryDriver {
    pub fn new(schema: TableSchema) -> Arc<Self> {
        Arc::new(Self {
            schema,
            store: Mutex::new(Vec::new()),
            cloud: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            create_failures: Mutex::new(HashMap::new()),
            always_fail_create: AtomicBool::new(false),
            replace_on_change: AtomicBool::new(false),
            next_generated: AtomicUsize::new(1),
            read_failures: AtomicUsize::new(0),
            drifting: AtomicBool::new(false),
            cloud_reads: AtomicUsize::new(0),
        })
    }

    pub fn with_store(self: Arc<Self>, records: Vec<Record>) -> Arc<Self> {
        *self.store.lock().unwrap() = records;
        self
    }

    pub fn with_cloud(self: Arc<Self>, records: Vec<Record>) -> Arc<Self> {
        *self.cloud.lock().unwrap() = records;
        self
    }

    pub fn fail_create_times(&self, identity: &str, times: usize) {
        self.create_failures
            .lock()
            .unwrap()
            .insert(identity.to_string(), times);
    }

    pub fn always_fail_create(&self) {
        self.always_fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_cloud_reads(&self, times: usize) {
        self.read_failures.store(times, Ordering::SeqCst);
    }

    pub fn keep_drifting(&self) {
        self.drifting.store(true, Ordering::SeqCst);
    }

    pub fn cloud_reads(&self) -> usize {
        self.cloud_reads.load(Ordering::SeqCst)
    }

    pub fn replace_on_change(&self) {
        self.replace_on_change.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn store_records(&self) -> Vec<Record> {
        self.store.lock().unwrap().clone()
    }

    pub fn cloud_records(&self) -> Vec<Record> {
        self.cloud.lock().unwrap().clone()
    }

    fn record_call(&self, call: &str, record: &Record) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", call, self.identity(record)));
    }

    fn err(&self, record: &Record, message: &str) -> DriverError {
        DriverError::new(self.schema.name.clone(), message).with_entity_id(self.identity(record))
    }

    fn position(&self, records: &[Record], record: &Record) -> Option<usize> {
        let id = self.identity(record);
        records.iter().position(|r| self.identity(r) == id)
    }
}

#[async_trait]
impl ResourceDriver for MemoryDriver {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn update_or_replace(&self, _declared: &Record, _observed: &Record) -> UpdateOrReplace {
        if self.replace_on_change.load(Ordering::SeqCst) {
            UpdateOrReplace::Replace
        } else {
            UpdateOrReplace::Update
        }
    }

    async fn db_read(&self, _ctx: &PassContext, _id: Option<&str>) -> Result<Vec<Record>, DriverError> {
        Ok(self.store_records())
    }

    async fn db_create(&self, _ctx: &PassContext, record: &Record) -> Result<Record, DriverError> {
        self.record_call("db_create", record);
        self.store.lock().unwrap().push(record.clone());
        Ok(record.clone())
    }

    async fn db_update(
        &self,
        _ctx: &PassContext,
        desired: &Record,
        current: &Record,
    ) -> Result<Record, DriverError> {
        self.record_call("db_update", desired);
        let mut store = self.store.lock().unwrap();
        let index = self
            .position(&store, current)
            .ok_or_else(|| self.err(current, "row not found"))?;
        store[index] = desired.clone();
        Ok(desired.clone())
    }

    async fn db_delete(&self, _ctx: &PassContext, record: &Record) -> Result<(), DriverError> {
        self.record_call("db_delete", record);
        let mut store = self.store.lock().unwrap();
        let index = self
            .position(&store, record)
            .ok_or_else(|| self.err(record, "row not found"))?;
        store.remove(index);
        Ok(())
    }

    async fn cloud_read(
        &self,
        _ctx: &PassContext,
        _id: Option<&str>,
    ) -> Result<Vec<Record>, DriverError> {
        let n = self.cloud_reads.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self
            .read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                left => Some(left - 1),
            })
            .is_ok();
        if failing {
            return Err(DriverError::new(self.schema.name.clone(), "throttled"));
        }
        if self.drifting.load(Ordering::SeqCst) {
            let mut cloud = self.cloud.lock().unwrap();
            for record in cloud.iter_mut() {
                record.set("cidr", format!("10.{}.0.0/16", n));
            }
        }
        Ok(self.cloud_records())
    }

    async fn cloud_create(&self, _ctx: &PassContext, record: &Record) -> Result<Record, DriverError> {
        self.record_call("cloud_create", record);
        if self.always_fail_create.load(Ordering::SeqCst) {
            return Err(self.err(record, "quota exceeded"));
        }
        {
            let mut failures = self.create_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&self.identity(record)) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(self.err(record, "dependency not ready"));
                }
            }
        }

        let mut cloud = self.cloud.lock().unwrap();
        if self.position(&cloud, record).is_some() {
            return Err(self.err(record, "already exists"));
        }
        let mut created = record.clone();
        for column in self.schema.columns.iter().filter(|c| c.generated) {
            let n = self.next_generated.fetch_add(1, Ordering::SeqCst);
            created.set(column.name.clone(), format!("{}-{}", self.schema.name, n));
        }
        cloud.push(created.clone());
        Ok(created)
    }

    async fn cloud_update(
        &self,
        _ctx: &PassContext,
        desired: &Record,
        current: &Record,
    ) -> Result<Record, DriverError> {
        self.record_call("cloud_update", desired);
        let mut cloud = self.cloud.lock().unwrap();
        let index = self
            .position(&cloud, current)
            .ok_or_else(|| self.err(current, "not found"))?;
        let mut updated = desired.clone();
        for column in self.schema.columns.iter().filter(|c| c.generated) {
            if let Some(v) = cloud[index].get(&column.name) {
                updated.set(column.name.clone(), v.clone());
            }
        }
        cloud[index] = updated.clone();
        Ok(updated)
    }

    async fn cloud_delete(&self, _ctx: &PassContext, record: &Record) -> Result<(), DriverError> {
        self.record_call("cloud_delete", record);
        let mut cloud = self.cloud.lock().unwrap();
        let index = self
            .position(&cloud, record)
            .ok_or_else(|| self.err(record, "not found"))?;
        cloud.remove(index);
        Ok(())
    }
}

/// Module with no tables
pub fn module(name: &str, deps: &[&str]) -> ModuleDescriptor {
    deps.iter()
        .fold(ModuleDescriptor::new(name, "1.0.0"), |m, d| m.depends_on(*d))
}

pub fn as_driver(driver: &Arc<MemoryDriver>) -> Arc<dyn ResourceDriver> {
    driver.clone()
}
