//! Module install / uninstall.
//!
//! Both sort the requested modules with the shared dependency sorter before
//! touching the store, so a cycle or missing dependency aborts with nothing
//! changed. Each module's migration hooks, trigger changes and bookkeeping
//! row commit together in one store transaction.
//!
//! Install runs modules root-first; uninstall runs them leaf-first.

use crate::commands::transaction::{settle, TransactionController};
use driftx_core::errors::{DriftError, Result};
use driftx_core::model::ModuleDescriptor;
use driftx_core::reconcile::{ReconcileOptions, ReconcileOutcome};
use driftx_core::{log_op_end, log_op_error, log_op_start};
use driftx_core_types::RequestContext;
use driftx_store::errors::from_rusqlite;
use driftx_store::{modules, triggers};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::info;

/// Options for [`TransactionController::install`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOptions {
    /// Pull existing provider resources of the new modules into the store
    pub sync: bool,
    /// Queue behind a running commit instead of failing fast
    pub force: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            sync: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    /// Newly installed modules, in install order
    pub installed: Vec<String>,
    pub sync: ReconcileOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallResult {
    /// Removed modules, in removal order
    pub uninstalled: Vec<String>,
}

impl TransactionController {
    /// Install `modules` and their change-capture triggers.
    ///
    /// Modules already installed are skipped.
    ///
    /// # Errors
    ///
    /// - `UnknownModule`, `MissingDependency` or `CycleDetected` before any mutation
    /// - `ConcurrencyConflict` when a commit holds the store
    /// - `Store` when a migration hook fails; modules installed before it stay installed
    pub async fn install<S: AsRef<str>>(
        &self,
        ctx: &RequestContext,
        modules: &[S],
        options: InstallOptions,
    ) -> Result<InstallResult> {
        let start = Instant::now();
        log_op_start!("install", request_id = %ctx.request_id, modules = modules.len());

        let result = self.run_install(ctx, modules, options).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(installed) => log_op_end!(
                "install",
                duration_ms = duration_ms,
                installed = installed.installed.len()
            ),
            Err(e) => log_op_error!("install", e.clone(), duration_ms = duration_ms),
        }
        result
    }

    async fn run_install<S: AsRef<str>>(
        &self,
        ctx: &RequestContext,
        requested: &[S],
        options: InstallOptions,
    ) -> Result<InstallResult> {
        let active: BTreeSet<String> = self.installed_modules()?.into_iter().collect();
        let order = self.registry.sort(requested, &active)?;
        if order.is_empty() {
            return Ok(InstallResult {
                installed: Vec::new(),
                sync: ReconcileOutcome::NothingToDo,
            });
        }

        let ticket = self.acquire(ctx, false, options.force, "install").await?;
        let outcome = async {
            for name in &order {
                let module = self.descriptor(name)?;
                self.store.with_conn(|conn| run_install_hooks(conn, module))?;
                info!(op = "install", module = %name, version = %module.version, "module installed");
            }

            let sync = if options.sync {
                self.reconcile_modules(ctx, &order, self.reconcile_options(ReconcileOptions::sync()))
                    .await?
            } else {
                ReconcileOutcome::NothingToDo
            };
            Ok::<_, DriftError>(InstallResult {
                installed: order.clone(),
                sync,
            })
        }
        .await;

        let finished = self.finish(ctx, &ticket, outcome.as_ref().err(), false);
        settle(outcome, finished)
    }

    /// Remove `modules`, dropping their change-capture triggers.
    ///
    /// # Errors
    ///
    /// - `ModuleNotInstalled` for a module that is not installed
    /// - `DependentModuleActive` when an installed module outside the request
    ///   depends on one being removed
    /// - `ConcurrencyConflict` when a commit holds the store
    pub async fn uninstall<S: AsRef<str>>(
        &self,
        ctx: &RequestContext,
        modules: &[S],
        force: bool,
    ) -> Result<UninstallResult> {
        let start = Instant::now();
        log_op_start!("uninstall", request_id = %ctx.request_id, modules = modules.len());

        let result = self.run_uninstall(ctx, modules, force).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(removed) => log_op_end!(
                "uninstall",
                duration_ms = duration_ms,
                uninstalled = removed.uninstalled.len()
            ),
            Err(e) => log_op_error!("uninstall", e.clone(), duration_ms = duration_ms),
        }
        result
    }

    async fn run_uninstall<S: AsRef<str>>(
        &self,
        ctx: &RequestContext,
        requested: &[S],
        force: bool,
    ) -> Result<UninstallResult> {
        let active: BTreeSet<String> = self.installed_modules()?.into_iter().collect();
        let requested: BTreeSet<String> = requested.iter().map(|s| s.as_ref().to_string()).collect();

        for name in &requested {
            if !active.contains(name) {
                return Err(DriftError::ModuleNotInstalled { name: name.clone() });
            }
            if let Some(dependent) = self
                .registry
                .dependents_of(name, &active)
                .find(|m| !requested.contains(&m.name))
            {
                return Err(DriftError::DependentModuleActive {
                    module: name.clone(),
                    dependent: dependent.name.clone(),
                });
            }
        }

        let remaining: BTreeSet<String> = active.difference(&requested).cloned().collect();
        let names: Vec<&String> = requested.iter().collect();
        let mut order = self.registry.sort(&names, &remaining)?;
        order.reverse();

        let ticket = self.acquire(ctx, false, force, "uninstall").await?;
        let outcome = order
            .iter()
            .try_for_each(|name| {
                let module = self.descriptor(name)?;
                self.store.with_conn(|conn| run_remove_hooks(conn, module))?;
                info!(op = "uninstall", module = %name, "module removed");
                Ok::<(), DriftError>(())
            })
            .map(|()| UninstallResult {
                uninstalled: order.clone(),
            });

        let finished = self.finish(ctx, &ticket, outcome.as_ref().err(), false);
        settle(outcome, finished)
    }

    fn descriptor(&self, name: &str) -> Result<&ModuleDescriptor> {
        self.registry.get(name).ok_or_else(|| DriftError::UnknownModule {
            name: name.to_string(),
        })
    }
}

fn run_install_hooks(conn: &mut Connection, module: &ModuleDescriptor) -> driftx_store::Result<()> {
    let hooks = &module.migrations;
    let tx = conn.transaction().map_err(from_rusqlite)?;

    for (hook, sql) in [
        ("before_install", &hooks.before_install),
        ("install", &hooks.install),
        ("after_install", &hooks.after_install),
    ] {
        if let Some(sql) = sql {
            tx.execute_batch(sql)
                .map_err(|e| from_rusqlite(e).with_op(hook).with_module(&module.name))?;
        }
    }
    for table in &module.tables {
        triggers::install_triggers(&tx, table)?;
    }
    modules::record_install(&tx, &module.name, &module.version)?;

    tx.commit().map_err(from_rusqlite)
}

fn run_remove_hooks(conn: &mut Connection, module: &ModuleDescriptor) -> driftx_store::Result<()> {
    let hooks = &module.migrations;
    let tx = conn.transaction().map_err(from_rusqlite)?;

    if let Some(sql) = &hooks.before_remove {
        tx.execute_batch(sql)
            .map_err(|e| from_rusqlite(e).with_op("before_remove").with_module(&module.name))?;
    }
    for table in &module.tables {
        triggers::drop_triggers(&tx, table)?;
    }
    for (hook, sql) in [("remove", &hooks.remove), ("after_remove", &hooks.after_remove)] {
        if let Some(sql) = sql {
            tx.execute_batch(sql)
                .map_err(|e| from_rusqlite(e).with_op(hook).with_module(&module.name))?;
        }
    }
    modules::record_uninstall(&tx, &module.name)?;

    tx.commit().map_err(from_rusqlite)
}
