use crate::driver::ResourceDriver;
use crate::model::TableSchema;
use std::sync::Arc;

/// SQL hooks run around a module's schema migration
///
/// `install` and `remove` are the forward and reverse migrations; the
/// `before_*` / `after_*` hooks run immediately around them inside the same
/// store transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleMigrations {
    pub install: Option<String>,
    pub remove: Option<String>,
    pub before_install: Option<String>,
    pub after_install: Option<String>,
    pub before_remove: Option<String>,
    pub after_remove: Option<String>,
}

/// A named, versioned bundle of resource tables and the drivers for them
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    /// Names of modules this one depends on
    pub dependencies: Vec<String>,
    /// Tables in dependency order (referenced tables first)
    pub tables: Vec<TableSchema>,
    pub migrations: ModuleMigrations,
    /// One driver per table, matched by `ResourceDriver::schema().name`
    pub drivers: Vec<Arc<dyn ResourceDriver>>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
            tables: Vec::new(),
            migrations: ModuleMigrations::default(),
            drivers: Vec::new(),
        }
    }

    pub fn depends_on(mut self, module: impl Into<String>) -> Self {
        self.dependencies.push(module.into());
        self
    }

    /// Register a driver; its schema becomes one of the module's tables
    pub fn with_driver(mut self, driver: Arc<dyn ResourceDriver>) -> Self {
        self.tables.push(driver.schema().clone());
        self.drivers.push(driver);
        self
    }

    pub fn with_migrations(mut self, migrations: ModuleMigrations) -> Self {
        self.migrations = migrations;
        self
    }

    /// Names of the tables this module provides
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn provides_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.name == table)
    }

    pub fn driver_for(&self, table: &str) -> Option<&Arc<dyn ResourceDriver>> {
        self.drivers.iter().find(|d| d.schema().name == table)
    }
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field("tables", &self.table_names().collect::<Vec<_>>())
            .field("migrations", &self.migrations)
            .field("drivers", &self.drivers.len())
            .finish()
    }
}
