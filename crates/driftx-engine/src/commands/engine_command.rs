//! Engine-level commands: the operations a control surface exposes.

use crate::commands::export::export_transaction_sql;
use crate::commands::modules::{InstallOptions, InstallResult, UninstallResult};
use crate::commands::transaction::{
    BeginResult, CommitOptions, CommitResult, RollbackResult, TransactionController,
};
use driftx_core::errors::Result;
use driftx_core_types::RequestContext;

/// Engine-level commands that touch the record store or the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Open a user transaction.
    Begin,
    /// Apply declared changes, then sync provider drift.
    Commit(CommitOptions),
    /// Pull provider state back over the open transaction.
    Rollback,
    /// Install modules (and their dependencies, if listed).
    Install {
        modules: Vec<String>,
        options: InstallOptions,
    },
    /// Remove installed modules.
    Uninstall { modules: Vec<String>, force: bool },
    /// Render the open transaction as forward SQL.
    ExportTransactionSql,
}

/// Result of applying an engine command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommandResult {
    Begun(BeginResult),
    Committed(CommitResult),
    RolledBack(RollbackResult),
    Installed(InstallResult),
    Uninstalled(UninstallResult),
    TransactionSql(Vec<String>),
}

/// Apply an engine command against `controller`.
///
/// # Errors
///
/// Whatever the dispatched operation returns.
pub async fn apply_engine_command(
    cmd: EngineCommand,
    controller: &TransactionController,
    ctx: &RequestContext,
) -> Result<EngineCommandResult> {
    match cmd {
        EngineCommand::Begin => controller.begin(ctx).await.map(EngineCommandResult::Begun),
        EngineCommand::Commit(options) => controller
            .commit(ctx, options)
            .await
            .map(EngineCommandResult::Committed),
        EngineCommand::Rollback => controller
            .rollback(ctx)
            .await
            .map(EngineCommandResult::RolledBack),
        EngineCommand::Install { modules, options } => controller
            .install(ctx, &modules, options)
            .await
            .map(EngineCommandResult::Installed),
        EngineCommand::Uninstall { modules, force } => controller
            .uninstall(ctx, &modules, force)
            .await
            .map(EngineCommandResult::Uninstalled),
        EngineCommand::ExportTransactionSql => {
            export_transaction_sql(controller.registry(), controller.store())
                .map(EngineCommandResult::TransactionSql)
        }
    }
}
