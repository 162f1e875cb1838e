//! Module registry.
//!
//! An explicit arena of [`ModuleDescriptor`]s built at process start and
//! passed by reference to the sorter, the reconciliation loop and the
//! transaction controller.

pub mod sort;

pub use sort::{find_cycle, sort_modules, DependencyGraph};

use crate::driver::ResourceDriver;
use crate::errors::{DriftError, Result};
use crate::model::{ModuleDescriptor, TableSchema};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Arena of module descriptors indexed by `(name, version)` and by name
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleDescriptor>,
    by_key: HashMap<(String, String), usize>,
    /// Most recently registered version of each name
    by_name: BTreeMap<String, usize>,
}

/// Registry view with one extra, not-yet-registered module
struct WithCandidate<'a> {
    registry: &'a ModuleRegistry,
    candidate: &'a ModuleDescriptor,
}

impl DependencyGraph for WithCandidate<'_> {
    fn dependencies_of(&self, module: &str) -> Option<Vec<String>> {
        if module == self.candidate.name {
            return Some(self.candidate.dependencies.clone());
        }
        self.registry.dependencies_of(module)
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the arena.
    ///
    /// # Errors
    ///
    /// - `DuplicateModule` if `(name, version)` is already registered
    /// - `CycleDetected` if the module closes a dependency cycle; the
    ///   registry is left unchanged
    pub fn register(&mut self, module: ModuleDescriptor) -> Result<()> {
        let key = (module.name.clone(), module.version.clone());
        if self.by_key.contains_key(&key) {
            return Err(DriftError::DuplicateModule {
                name: module.name,
                version: module.version,
            });
        }

        let view = WithCandidate {
            registry: self,
            candidate: &module,
        };
        if let Some(cycle) = find_cycle(&view, &module.name) {
            return Err(DriftError::CycleDetected { modules: cycle });
        }

        debug!(
            module = %module.name,
            version = %module.version,
            tables = module.tables.len(),
            "module registered"
        );

        let index = self.modules.len();
        self.by_name.insert(module.name.clone(), index);
        self.by_key.insert(key, index);
        self.modules.push(module);
        Ok(())
    }

    /// Latest registered version of `name`
    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.by_name.get(name).map(|&i| &self.modules[i])
    }

    pub fn get_version(&self, name: &str, version: &str) -> Option<&ModuleDescriptor> {
        self.by_key
            .get(&(name.to_string(), version.to_string()))
            .map(|&i| &self.modules[i])
    }

    /// Latest version of every registered name, in name order
    pub fn latest(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.by_name.values().map(|&i| &self.modules[i])
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// `names` plus everything they transitively depend on
    ///
    /// # Errors
    ///
    /// `UnknownModule` for an unregistered name anywhere in the closure.
    pub fn dependency_closure<S: AsRef<str>>(&self, names: &[S]) -> Result<BTreeSet<String>> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        while let Some(name) = stack.pop() {
            if !closure.insert(name.clone()) {
                continue;
            }
            let module = self
                .get(&name)
                .ok_or_else(|| DriftError::UnknownModule { name: name.clone() })?;
            stack.extend(module.dependencies.iter().cloned());
        }
        Ok(closure)
    }

    /// Modules (latest versions) that provide any of `tables`
    pub fn modules_for_tables<S: AsRef<str>>(&self, tables: &[S]) -> BTreeSet<String> {
        self.latest()
            .filter(|m| tables.iter().any(|t| m.provides_table(t.as_ref())))
            .map(|m| m.name.clone())
            .collect()
    }

    /// Dependency order for `requested`; see [`sort_modules`]
    pub fn sort<S: AsRef<str>>(
        &self,
        requested: &[S],
        already_active: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let requested: Vec<&str> = requested.iter().map(|s| s.as_ref()).collect();
        sort_modules(self, &requested, already_active)
    }

    /// Drivers of `modules` and their dependencies, root tables first
    ///
    /// Within one module, tables keep their declared order.
    pub fn drivers_in_order<S: AsRef<str>>(
        &self,
        modules: &[S],
    ) -> Result<Vec<Arc<dyn ResourceDriver>>> {
        let order = self.sort(modules, &BTreeSet::new())?;
        let mut drivers = Vec::new();
        for name in &order {
            let module = self
                .get(name)
                .ok_or_else(|| DriftError::UnknownModule { name: name.clone() })?;
            drivers.extend(module.drivers.iter().cloned());
        }
        Ok(drivers)
    }

    /// Schema of `table` from whichever module provides it
    pub fn table_schema(&self, table: &str) -> Option<&TableSchema> {
        self.latest()
            .flat_map(|m| m.tables.iter())
            .find(|t| t.name == table)
    }

    /// Every table schema across the latest versions
    pub fn table_schemas(&self) -> Vec<&TableSchema> {
        self.latest().flat_map(|m| m.tables.iter()).collect()
    }

    /// Installed modules whose dependencies include `name`
    pub fn dependents_of<'a>(
        &'a self,
        name: &'a str,
        among: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a ModuleDescriptor> + 'a {
        among
            .iter()
            .filter_map(|n| self.get(n))
            .filter(move |m| m.dependencies.iter().any(|d| d == name))
    }
}

impl DependencyGraph for ModuleRegistry {
    fn dependencies_of(&self, module: &str) -> Option<Vec<String>> {
        self.get(module).map(|m| m.dependencies.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str, version: &str, deps: &[&str]) -> ModuleDescriptor {
        deps.iter()
            .fold(ModuleDescriptor::new(name, version), |m, d| m.depends_on(*d))
    }

    #[test]
    fn test_rejects_duplicate_name_and_version() {
        let mut registry = ModuleRegistry::new();
        registry.register(module("network", "1.0.0", &[])).unwrap();

        let err = registry
            .register(module("network", "1.0.0", &[]))
            .unwrap_err();
        assert!(matches!(err, DriftError::DuplicateModule { .. }));

        registry.register(module("network", "1.1.0", &[])).unwrap();
        assert_eq!(registry.get("network").unwrap().version, "1.1.0");
        assert!(registry.get_version("network", "1.0.0").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_rejects_cycle_at_registration() {
        let mut registry = ModuleRegistry::new();
        registry.register(module("a", "1", &["b"])).unwrap();

        let err = registry.register(module("b", "1", &["a"])).unwrap_err();

        assert!(matches!(err, DriftError::CycleDetected { .. }));
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn test_dependency_closure() {
        let mut registry = ModuleRegistry::new();
        registry.register(module("network", "1", &[])).unwrap();
        registry.register(module("subnet", "1", &["network"])).unwrap();
        registry.register(module("role", "1", &[])).unwrap();

        let closure = registry.dependency_closure(&["subnet"]).unwrap();
        assert_eq!(
            closure.into_iter().collect::<Vec<_>>(),
            vec!["network", "subnet"]
        );

        assert!(registry.dependency_closure(&["ghost"]).is_err());
    }

    #[test]
    fn test_dependents_among_installed() {
        let mut registry = ModuleRegistry::new();
        registry.register(module("network", "1", &[])).unwrap();
        registry.register(module("subnet", "1", &["network"])).unwrap();

        let installed: BTreeSet<String> =
            ["network".to_string(), "subnet".to_string()].into();
        let dependents: Vec<_> = registry
            .dependents_of("network", &installed)
            .map(|m| m.name.clone())
            .collect();

        assert_eq!(dependents, vec!["subnet"]);
    }
}
