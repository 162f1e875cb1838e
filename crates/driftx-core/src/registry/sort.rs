//! Topological ordering of modules by declared dependency.

use crate::errors::{DriftError, Result};
use crate::model::ModuleDescriptor;
use std::collections::{BTreeMap, BTreeSet};

/// Read-only view of a module dependency graph
pub trait DependencyGraph {
    /// Declared dependencies of `module`, or `None` if the module is unknown
    fn dependencies_of(&self, module: &str) -> Option<Vec<String>>;
}

impl DependencyGraph for [ModuleDescriptor] {
    fn dependencies_of(&self, module: &str) -> Option<Vec<String>> {
        self.iter()
            .rev()
            .find(|m| m.name == module)
            .map(|m| m.dependencies.clone())
    }
}

impl DependencyGraph for Vec<ModuleDescriptor> {
    fn dependencies_of(&self, module: &str) -> Option<Vec<String>> {
        self.as_slice().dependencies_of(module)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Order `requested` and their transitive dependencies root-first.
///
/// Every emitted module follows all of its emitted dependencies. Modules in
/// `already_active` count as satisfied: they are neither traversed nor
/// emitted. Traversal visits names in sorted order, so the result is stable
/// for a given graph.
///
/// For removal, reverse the returned order.
///
/// # Errors
///
/// - `UnknownModule` if a requested module is neither in the graph nor active
/// - `MissingDependency` if a dependency is neither in the graph nor active
/// - `CycleDetected` with the cycle path; nothing is emitted
pub fn sort_modules<G>(
    graph: &G,
    requested: &[&str],
    already_active: &BTreeSet<String>,
) -> Result<Vec<String>>
where
    G: DependencyGraph + ?Sized,
{
    let mut marks: BTreeMap<String, Mark> = BTreeMap::new();
    let mut order = Vec::new();
    let mut path = Vec::new();

    let roots: BTreeSet<&str> = requested.iter().copied().collect();
    for root in roots {
        if already_active.contains(root) {
            continue;
        }
        if graph.dependencies_of(root).is_none() {
            return Err(DriftError::UnknownModule {
                name: root.to_string(),
            });
        }
        visit(graph, root, already_active, &mut marks, &mut path, &mut order)?;
    }

    Ok(order)
}

fn visit<G>(
    graph: &G,
    module: &str,
    already_active: &BTreeSet<String>,
    marks: &mut BTreeMap<String, Mark>,
    path: &mut Vec<String>,
    order: &mut Vec<String>,
) -> Result<()>
where
    G: DependencyGraph + ?Sized,
{
    match marks.get(module) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|m| m == module).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].to_vec();
            cycle.push(module.to_string());
            return Err(DriftError::CycleDetected { modules: cycle });
        }
        None => {}
    }

    let mut deps = graph
        .dependencies_of(module)
        .ok_or_else(|| DriftError::UnknownModule {
            name: module.to_string(),
        })?;
    deps.sort();
    deps.dedup();

    marks.insert(module.to_string(), Mark::Visiting);
    path.push(module.to_string());

    for dep in &deps {
        if already_active.contains(dep) {
            continue;
        }
        if graph.dependencies_of(dep).is_none() {
            return Err(DriftError::MissingDependency {
                module: module.to_string(),
                dependency: dep.clone(),
            });
        }
        visit(graph, dep, already_active, marks, path, order)?;
    }

    path.pop();
    marks.insert(module.to_string(), Mark::Done);
    order.push(module.to_string());
    Ok(())
}

/// First dependency cycle reachable from `start`, if any.
///
/// Unknown dependencies are skipped; they may be registered later.
pub fn find_cycle<G>(graph: &G, start: &str) -> Option<Vec<String>>
where
    G: DependencyGraph + ?Sized,
{
    fn walk<G: DependencyGraph + ?Sized>(
        graph: &G,
        module: &str,
        marks: &mut BTreeMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(module) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|m| m == module).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(module.to_string());
                return Some(cycle);
            }
            None => {}
        }
        let deps = graph.dependencies_of(module)?;
        marks.insert(module.to_string(), Mark::Visiting);
        path.push(module.to_string());
        for dep in &deps {
            if let Some(cycle) = walk(graph, dep, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(module.to_string(), Mark::Done);
        None
    }

    walk(graph, start, &mut BTreeMap::new(), &mut Vec::new())
}
