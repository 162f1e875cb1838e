#![allow(dead_code)]

use async_trait::async_trait;
use driftx_core::driver::{PassContext, ResourceDriver};
use driftx_core::errors::DriverError;
use driftx_core::model::{ColumnDef, ColumnKind, ModuleDescriptor, ModuleMigrations, Record, TableSchema};
use driftx_core::registry::ModuleRegistry;
use driftx_core_types::RequestContext;
use driftx_engine::config::EngineConfig;
use driftx_engine::{InstallOptions, TransactionController};
use driftx_store::RecordStore;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn role_schema() -> TableSchema {
    TableSchema::new("role")
        .surrogate_key("id")
        .column("name", ColumnKind::Scalar)
        .column("policy", ColumnKind::Scalar)
        .identity(&["name"])
}

pub fn network_schema() -> TableSchema {
    TableSchema::new("network")
        .surrogate_key("id")
        .column("name", ColumnKind::Scalar)
        .column("cidr", ColumnKind::Scalar)
        .generated_column("network_id", ColumnKind::Scalar)
        .identity(&["name"])
}

pub fn role(name: &str, policy: &str) -> Record {
    Record::new().with("name", name).with("policy", policy)
}

pub fn network(name: &str, cidr: &str) -> Record {
    Record::new().with("name", name).with("cidr", cidr)
}

/// In-memory provider shared by every driver of a test
#[derive(Default)]
pub struct FakeCloud {
    resources: Mutex<BTreeMap<String, Vec<Record>>>,
    failing_creates: Mutex<HashSet<String>>,
    /// name -> (table, name) that must exist before it can be created
    prerequisites: Mutex<BTreeMap<String, (String, String)>>,
    failing_store_writes: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    next_generated: AtomicUsize,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a resource as if created outside driftx
    pub fn put(&self, table: &str, record: Record) {
        self.resources
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(record);
    }

    pub fn records(&self, table: &str) -> Vec<Record> {
        self.resources
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn names(&self, table: &str) -> Vec<String> {
        self.records(table)
            .iter()
            .filter_map(|r| r.get_str("name").map(str::to_string))
            .collect()
    }

    /// Every create of `name` fails with "quota exceeded"
    pub fn reject_creates_of(&self, name: &str) {
        self.failing_creates.lock().unwrap().insert(name.to_string());
    }

    /// Creates of `name` fail with "dependency not ready" until `table`
    /// holds `needs`
    pub fn require_before(&self, name: &str, table: &str, needs: &str) {
        self.prerequisites
            .lock()
            .unwrap()
            .insert(name.to_string(), (table.to_string(), needs.to_string()));
    }

    /// Resource vanishes from the provider without driftx noticing
    pub fn forget(&self, table: &str, name: &str) {
        if let Some(rows) = self.resources.lock().unwrap().get_mut(table) {
            rows.retain(|r| r.get_str("name") != Some(name));
        }
    }

    /// Store inserts and deletes of `name` fail, as if the disk were full
    pub fn reject_store_writes_of(&self, name: &str) {
        self.failing_store_writes
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    fn missing_prerequisite(&self, name: &str) -> bool {
        let needed = self.prerequisites.lock().unwrap().get(name).cloned();
        match needed {
            Some((table, needs)) => !self.names(&table).contains(&needs),
            None => false,
        }
    }

    pub fn calls_of(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record_call(&self, call: &str, table: &str, record: &Record) {
        self.calls.lock().unwrap().push(format!(
            "{} {} {}",
            call,
            table,
            record.get_str("name").unwrap_or_default()
        ));
    }
}

/// Driver reading and writing a real record store, and the fake provider
pub struct StoreDriver {
    schema: TableSchema,
    store: Arc<RecordStore>,
    cloud: Arc<FakeCloud>,
}

impl StoreDriver {
    pub fn new(schema: TableSchema, store: Arc<RecordStore>, cloud: Arc<FakeCloud>) -> Arc<Self> {
        Arc::new(Self {
            schema,
            store,
            cloud,
        })
    }

    fn err(&self, record: &Record, message: impl Into<String>) -> DriverError {
        DriverError::new(self.schema.name.clone(), message).with_entity_id(self.identity(record))
    }

    fn provider_assigned(&self) -> impl Iterator<Item = &ColumnDef> {
        self.schema
            .columns
            .iter()
            .filter(|c| c.generated && !self.schema.is_surrogate_key(&c.name))
    }

    /// Provider view of a record: no surrogate key
    fn provider_copy(&self, record: &Record) -> Record {
        let mut copy = record.clone();
        if let Some(key) = &self.schema.surrogate_key {
            copy.remove(key);
        }
        copy
    }
}

#[async_trait]
impl ResourceDriver for StoreDriver {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn db_read(&self, _ctx: &PassContext, _id: Option<&str>) -> Result<Vec<Record>, DriverError> {
        self.store
            .select_all(&self.schema)
            .map_err(|e| DriverError::new(self.schema.name.clone(), e.to_string()))
    }

    async fn db_create(&self, _ctx: &PassContext, record: &Record) -> Result<Record, DriverError> {
        let name = record.get_str("name").unwrap_or_default();
        if self.cloud.failing_store_writes.lock().unwrap().contains(name) {
            return Err(self.err(record, "disk full"));
        }
        self.store
            .insert(&self.schema, record)
            .map_err(|e| self.err(record, e.to_string()))
    }

    async fn db_update(
        &self,
        _ctx: &PassContext,
        desired: &Record,
        current: &Record,
    ) -> Result<Record, DriverError> {
        self.store
            .update(&self.schema, desired, current)
            .map_err(|e| self.err(current, e.to_string()))
    }

    async fn db_delete(&self, _ctx: &PassContext, record: &Record) -> Result<(), DriverError> {
        let name = record.get_str("name").unwrap_or_default();
        if self.cloud.failing_store_writes.lock().unwrap().contains(name) {
            return Err(self.err(record, "disk full"));
        }
        self.store
            .delete(&self.schema, record)
            .map_err(|e| self.err(record, e.to_string()))
    }

    async fn cloud_read(
        &self,
        _ctx: &PassContext,
        _id: Option<&str>,
    ) -> Result<Vec<Record>, DriverError> {
        // Lets a concurrent caller run while this pass is in flight
        tokio::task::yield_now().await;
        Ok(self.cloud.records(&self.schema.name))
    }

    async fn cloud_create(&self, _ctx: &PassContext, record: &Record) -> Result<Record, DriverError> {
        let table = self.schema.name.clone();
        self.cloud.record_call("cloud_create", &table, record);
        let name = record.get_str("name").unwrap_or_default().to_string();
        if self.cloud.failing_creates.lock().unwrap().contains(&name) {
            return Err(self.err(record, "quota exceeded"));
        }
        if self.cloud.missing_prerequisite(&name) {
            return Err(self.err(record, "dependency not ready"));
        }

        let mut created = self.provider_copy(record);
        for column in self.provider_assigned() {
            let n = self.cloud.next_generated.fetch_add(1, Ordering::SeqCst) + 1;
            created.set(column.name.clone(), format!("{}-{}", table, n));
        }
        self.cloud.put(&table, created.clone());
        Ok(created)
    }

    async fn cloud_update(
        &self,
        _ctx: &PassContext,
        desired: &Record,
        current: &Record,
    ) -> Result<Record, DriverError> {
        self.cloud.record_call("cloud_update", &self.schema.name, desired);
        let mut resources = self.cloud.resources.lock().unwrap();
        let rows = resources.entry(self.schema.name.clone()).or_default();
        let id = self.identity(current);
        let row = rows
            .iter_mut()
            .find(|r| self.schema.identity_of(r) == id)
            .ok_or_else(|| self.err(current, "not found"))?;

        let mut updated = self.provider_copy(desired);
        for column in self.provider_assigned() {
            if let Some(value) = row.get(&column.name) {
                updated.set(column.name.clone(), value.clone());
            }
        }
        *row = updated.clone();
        Ok(updated)
    }

    async fn cloud_delete(&self, _ctx: &PassContext, record: &Record) -> Result<(), DriverError> {
        self.cloud.record_call("cloud_delete", &self.schema.name, record);
        let mut resources = self.cloud.resources.lock().unwrap();
        let rows = resources.entry(self.schema.name.clone()).or_default();
        let id = self.identity(record);
        let before = rows.len();
        rows.retain(|r| self.schema.identity_of(r) != id);
        if rows.len() == before {
            return Err(self.err(record, "not found"));
        }
        Ok(())
    }
}

fn migrations(table_sql: &str, table: &str) -> ModuleMigrations {
    ModuleMigrations {
        install: Some(table_sql.to_string()),
        remove: Some(format!("DROP TABLE {};", table)),
        ..ModuleMigrations::default()
    }
}

/// `iam` (role) and `vpc` (network, depends on `iam`)
pub fn registry(store: &Arc<RecordStore>, cloud: &Arc<FakeCloud>) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry
        .register(
            ModuleDescriptor::new("iam", "1.0.0")
                .with_driver(StoreDriver::new(role_schema(), store.clone(), cloud.clone()))
                .with_migrations(migrations(
                    "CREATE TABLE role (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, policy TEXT);",
                    "role",
                )),
        )
        .unwrap();
    registry
        .register(
            ModuleDescriptor::new("vpc", "1.0.0")
                .depends_on("iam")
                .with_driver(StoreDriver::new(network_schema(), store.clone(), cloud.clone()))
                .with_migrations(migrations(
                    "CREATE TABLE network (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, cidr TEXT, network_id TEXT);",
                    "network",
                )),
        )
        .unwrap();
    registry
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default().with_actor("tester");
    config.transaction.backoff_base_ms = 1;
    config.transaction.backoff_max_ms = 5;
    config.transaction.begin_max_attempts = 3;
    config.transaction.commit_queue_max_attempts = 200;
    config
}

pub struct Harness {
    pub _dir: TempDir,
    pub store: Arc<RecordStore>,
    pub cloud: Arc<FakeCloud>,
    pub controller: TransactionController,
}

impl Harness {
    /// Registry built, nothing installed
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("driftx.db")).unwrap());
        let cloud = FakeCloud::new();
        let registry = Arc::new(registry(&store, &cloud));
        let controller = TransactionController::new(registry, store.clone(), test_config());
        Self {
            _dir: dir,
            store,
            cloud,
            controller,
        }
    }

    /// Both modules installed
    pub async fn installed() -> Self {
        let harness = Self::new();
        harness
            .controller
            .install(&ctx(), &["iam", "vpc"], InstallOptions::default())
            .await
            .unwrap();
        harness
    }

    pub fn networks(&self) -> Vec<Record> {
        self.store.select_all(&network_schema()).unwrap()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.networks()
            .iter()
            .filter_map(|r| r.get_str("name").map(str::to_string))
            .collect()
    }

    pub fn roles(&self) -> Vec<Record> {
        self.store.select_all(&role_schema()).unwrap()
    }

    pub fn declare_role(&self, name: &str, policy: &str) -> Record {
        self.store.insert(&role_schema(), &role(name, policy)).unwrap()
    }

    pub fn declare_network(&self, name: &str, cidr: &str) -> Record {
        self.store.insert(&network_schema(), &network(name, cidr)).unwrap()
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new("tester")
}
