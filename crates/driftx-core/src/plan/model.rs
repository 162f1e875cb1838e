//! Crupde plan types.
//!
//! A plan is a per-table summary of the create/update/replace/delete
//! actions of one reconciliation. It is a preview or audit artifact; nothing
//! reads it back as state. Maps are `BTreeMap` for deterministic
//! serialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of action a plan entry stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    Replace,
    Delete,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Create => "create",
            PlanAction::Update => "update",
            PlanAction::Replace => "replace",
            PlanAction::Delete => "delete",
        }
    }
}

/// One planned action on one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Entity identity
    pub id: String,
    /// Driver-supplied human description
    pub description: String,
}

impl PlanEntry {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

/// Table name to planned entries, per action kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrupdePlan {
    pub to_create: BTreeMap<String, Vec<PlanEntry>>,
    pub to_update: BTreeMap<String, Vec<PlanEntry>>,
    pub to_replace: BTreeMap<String, Vec<PlanEntry>>,
    pub to_delete: BTreeMap<String, Vec<PlanEntry>>,
}

/// Number of entries per action kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCounts {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
}

impl PlanCounts {
    pub fn total(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }
}

impl CrupdePlan {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_mut(&mut self, action: PlanAction) -> &mut BTreeMap<String, Vec<PlanEntry>> {
        match action {
            PlanAction::Create => &mut self.to_create,
            PlanAction::Update => &mut self.to_update,
            PlanAction::Replace => &mut self.to_replace,
            PlanAction::Delete => &mut self.to_delete,
        }
    }

    /// Entries for one action kind
    pub fn bucket(&self, action: PlanAction) -> &BTreeMap<String, Vec<PlanEntry>> {
        match action {
            PlanAction::Create => &self.to_create,
            PlanAction::Update => &self.to_update,
            PlanAction::Replace => &self.to_replace,
            PlanAction::Delete => &self.to_delete,
        }
    }

    /// Append an entry under `table`
    pub fn push(&mut self, action: PlanAction, table: &str, entry: PlanEntry) {
        self.bucket_mut(action)
            .entry(table.to_string())
            .or_default()
            .push(entry);
    }

    /// Fold `other` into this plan, skipping entries whose id is already listed
    /// for the same table and action
    pub fn merge(&mut self, other: &CrupdePlan) {
        for action in [
            PlanAction::Create,
            PlanAction::Update,
            PlanAction::Replace,
            PlanAction::Delete,
        ] {
            for (table, entries) in other.bucket(action) {
                let target = self.bucket_mut(action).entry(table.clone()).or_default();
                for entry in entries {
                    if !target.iter().any(|e| e.id == entry.id) {
                        target.push(entry.clone());
                    }
                }
            }
        }
    }

    pub fn counts(&self) -> PlanCounts {
        let count = |m: &BTreeMap<String, Vec<PlanEntry>>| m.values().map(Vec::len).sum();
        PlanCounts {
            create: count(&self.to_create),
            update: count(&self.to_update),
            replace: count(&self.to_replace),
            delete: count(&self.to_delete),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }

    /// Every table mentioned by any action
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .to_create
            .keys()
            .chain(self.to_update.keys())
            .chain(self.to_replace.keys())
            .chain(self.to_delete.keys())
            .cloned()
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }
}
