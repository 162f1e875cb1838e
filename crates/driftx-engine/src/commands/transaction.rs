//! Transaction controller: begin / commit / rollback over one record store.
//!
//! All state lives in the audit log, so every controller (and every process)
//! sharing a database sees the same state machine.
//!
//! ## Commit pipeline (in order):
//! 1. Acquire the commit marker (fail fast, or queue with backoff when forced)
//! 2. Collect the tables touched since the previous `START_COMMIT`
//! 3. Apply over the installed modules owning them plus their dependencies (fast path)
//! 4. If that fails, apply over every installed module (slow path)
//! 5. Sync every installed module to capture provider-side drift
//! 6. If apply or sync failed, undo the replay window with inverse statements
//!    and push the reverted state outward again
//! 7. Always write `ERROR` (on failure) and the end marker, then close the
//!    open transaction

use crate::config::EngineConfig;
use driftx_core::audit::{generate_statements, ChangeKind, StatementDirection};
use driftx_core::errors::{CommitFailure, DriftError, Result};
use driftx_core::reconcile::{reconcile, ReconcileOptions, ReconcileOutcome};
use driftx_core::registry::ModuleRegistry;
use driftx_core::{log_op_end, log_op_error, log_op_start};
use driftx_core_types::{RequestContext, TransactionId};
use driftx_store::audit_log::{self, AuditQuery};
use driftx_store::{modules, RecordStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Options for [`TransactionController::commit`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Compute plans without executing anything; writes `PREVIEW_*` markers
    pub dry_run: bool,
    /// Queue behind a running commit instead of failing fast
    pub force: bool,
}

impl CommitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    #[must_use]
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Result of a successful `begin`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginResult {
    pub transaction_id: String,
    /// Id of the `OPEN_TXN` audit entry
    pub marker_id: i64,
}

/// Which module scope the apply phase converged over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPath {
    /// Modules with changes and their dependencies
    Fast,
    /// Every installed module, after the fast path failed
    Slow,
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    /// Transaction id when one was open, otherwise a fresh UUIDv7
    pub commit_id: String,
    pub dry_run: bool,
    /// Installed modules owning tables touched since the previous commit
    pub modules_with_changes: Vec<String>,
    pub path: CommitPath,
    pub apply: ReconcileOutcome,
    pub sync: ReconcileOutcome,
}

/// Result of an explicit rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackResult {
    pub transaction_id: String,
    pub sync: ReconcileOutcome,
}

/// A held commit marker
#[derive(Debug, Clone)]
pub(crate) struct CommitTicket {
    /// Id of the `START_COMMIT` / `PREVIEW_START_COMMIT` entry
    pub marker_id: i64,
    pub commit_id: String,
    pub preview: bool,
    /// Transaction open when the marker was taken
    pub transaction: Option<String>,
}

/// Audit window a commit works from
#[derive(Debug, Clone)]
struct CommitWindow {
    tables: Vec<String>,
    /// Exclusive lower id bound of the entries a failed commit undoes: the
    /// open `OPEN_TXN`, else the later of the previous `START_COMMIT` and
    /// `END_COMMIT`
    replay_from: i64,
}

/// Serializes commits and transactions on one record store
#[derive(Debug, Clone)]
pub struct TransactionController {
    pub(crate) registry: Arc<ModuleRegistry>,
    pub(crate) store: Arc<RecordStore>,
    pub(crate) config: EngineConfig,
}

impl TransactionController {
    pub fn new(registry: Arc<ModuleRegistry>, store: Arc<RecordStore>, config: EngineConfig) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn actor<'a>(&'a self, ctx: &'a RequestContext) -> &'a str {
        if ctx.actor.is_empty() {
            &self.config.actor
        } else {
            &ctx.actor
        }
    }

    pub(crate) fn reconcile_options(&self, base: ReconcileOptions) -> ReconcileOptions {
        base.with_stall_threshold(self.config.reconcile.stall_threshold)
    }

    /// Open a user transaction.
    ///
    /// # Errors
    ///
    /// `ConcurrencyConflict` when a commit keeps running or another
    /// transaction stays open for every poll attempt.
    pub async fn begin(&self, ctx: &RequestContext) -> Result<BeginResult> {
        let start = Instant::now();
        log_op_start!("begin", request_id = %ctx.request_id);

        let result = self.open_transaction(ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(begun) => log_op_end!(
                "begin",
                duration_ms = duration_ms,
                transaction_id = %begun.transaction_id
            ),
            Err(e) => log_op_error!("begin", e.clone(), duration_ms = duration_ms),
        }
        result
    }

    async fn open_transaction(&self, ctx: &RequestContext) -> Result<BeginResult> {
        let actor = self.actor(ctx);
        let transaction_id = TransactionId::new();
        let attempts = self.config.transaction.begin_max_attempts.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.transaction.backoff(attempt - 1)).await;
            }
            let opened = self.store.with_conn(|conn| {
                audit_log::try_open_transaction(conn, actor, transaction_id.as_str())
            })?;
            if let Some(marker_id) = opened {
                return Ok(BeginResult {
                    transaction_id: transaction_id.as_str().to_string(),
                    marker_id,
                });
            }
            debug!(op = "begin", attempt, "record store busy");
        }

        Err(DriftError::ConcurrencyConflict {
            reason: "another transaction is open".to_string(),
        })
    }

    /// Push declared changes to the provider, then pull provider drift back.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict` when another commit holds the store
    /// - `CommitFailed` when apply or sync failed; carries the rollback
    ///   outcome alongside
    /// - the raw apply/sync error for a dry run
    pub async fn commit(&self, ctx: &RequestContext, options: CommitOptions) -> Result<CommitResult> {
        let start = Instant::now();
        log_op_start!(
            "commit",
            request_id = %ctx.request_id,
            dry_run = options.dry_run,
            force = options.force
        );

        let result = self.run_commit(ctx, options).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(committed) => log_op_end!(
                "commit",
                duration_ms = duration_ms,
                commit_id = %committed.commit_id,
                path = ?committed.path,
                applied = committed.apply.plan().counts().total(),
                synced = committed.sync.plan().counts().total()
            ),
            Err(e) => log_op_error!("commit", e.clone(), duration_ms = duration_ms),
        }
        result
    }

    async fn run_commit(&self, ctx: &RequestContext, options: CommitOptions) -> Result<CommitResult> {
        let ticket = self
            .acquire(ctx, options.dry_run, options.force, "commit")
            .await?;
        let outcome = self.commit_body(ctx, &ticket).await;
        let finished = self.finish(ctx, &ticket, outcome.as_ref().err(), !ticket.preview);
        settle(outcome, finished)
    }

    async fn commit_body(&self, ctx: &RequestContext, ticket: &CommitTicket) -> Result<CommitResult> {
        let installed = self.installed_modules()?;
        let window = self.commit_window(ticket.marker_id)?;

        let changed: Vec<String> = self
            .registry
            .modules_for_tables(&window.tables)
            .into_iter()
            .filter(|m| installed.contains(m))
            .collect();
        let scope: Vec<String> = self
            .registry
            .dependency_closure(&changed)?
            .into_iter()
            .collect();
        info!(
            op = "commit",
            commit_id = %ticket.commit_id,
            tables = window.tables.len(),
            modules_with_changes = changed.len(),
            "commit window collected"
        );

        let apply_options = self.reconcile_options(ReconcileOptions::apply().with_preview(ticket.preview));
        let applied = self.apply_with_fallback(ctx, &scope, &installed, apply_options).await;
        if let Err(e) = &applied {
            warn!(op = "commit", error = %e, "apply failed; still syncing provider drift");
        }

        let sync_options = self.reconcile_options(ReconcileOptions::sync().with_preview(ticket.preview));
        let synced = self.reconcile_modules(ctx, &installed, sync_options).await;

        let ((apply, path), sync) = match (applied, synced) {
            (Ok(applied), Ok(synced)) => (applied, synced),
            (applied, synced) => {
                return Err(self
                    .fail(ctx, ticket, &window, applied.err(), synced.err())
                    .await)
            }
        };

        Ok(CommitResult {
            commit_id: ticket.commit_id.clone(),
            dry_run: ticket.preview,
            modules_with_changes: changed,
            path,
            apply,
            sync,
        })
    }

    async fn apply_with_fallback(
        &self,
        ctx: &RequestContext,
        scope: &[String],
        installed: &[String],
        options: ReconcileOptions,
    ) -> Result<(ReconcileOutcome, CommitPath)> {
        if scope.is_empty() {
            return Ok((ReconcileOutcome::NothingToDo, CommitPath::Fast));
        }

        match self.reconcile_modules(ctx, scope, options).await {
            Ok(outcome) => return Ok((outcome, CommitPath::Fast)),
            Err(e) => warn!(
                op = "commit",
                error = %e,
                modules = scope.len(),
                "fast path failed; applying over all installed modules"
            ),
        }

        let outcome = self.reconcile_modules(ctx, installed, options).await?;
        Ok((outcome, CommitPath::Slow))
    }

    /// Undo the replay window after a failed apply or sync
    async fn fail(
        &self,
        ctx: &RequestContext,
        ticket: &CommitTicket,
        window: &CommitWindow,
        apply: Option<DriftError>,
        sync: Option<DriftError>,
    ) -> DriftError {
        if ticket.preview {
            return match (apply, sync) {
                (Some(e), _) | (None, Some(e)) => e,
                (None, None) => DriftError::Internal {
                    message: "commit failed without an error".to_string(),
                },
            };
        }

        let rollback = self.compensate(ctx, window.replay_from).await.err();
        match &rollback {
            Some(e) => warn!(op = "commit", error = %e, "compensating rollback failed"),
            None => info!(op = "commit", commit_id = %ticket.commit_id, "compensating rollback applied"),
        }
        DriftError::CommitFailed(Box::new(CommitFailure {
            apply,
            sync,
            rollback,
        }))
    }

    /// Apply inverse statements for every row change after `replay_from`,
    /// then re-apply so the provider follows the reverted store
    async fn compensate(&self, ctx: &RequestContext, replay_from: i64) -> Result<()> {
        let restore = async {
            let entries = self.store.with_conn(|conn| {
                audit_log::query(conn, &AuditQuery::row_changes().after(replay_from))
            })?;
            let schemas = self.registry.table_schemas();
            let statements = generate_statements(
                &entries,
                &schemas,
                self.store.as_ref(),
                StatementDirection::Inverse,
            )?;
            self.store.apply_statements(&statements)?;
            info!(
                op = "rollback",
                entries = entries.len(),
                statements = statements.len(),
                "inverse statements applied"
            );

            let installed = self.installed_modules()?;
            self.reconcile_modules(ctx, &installed, self.reconcile_options(ReconcileOptions::apply()))
                .await?;
            Ok::<(), DriftError>(())
        };

        restore.await.map_err(|e| DriftError::Rollback {
            message: e.to_string(),
        })
    }

    /// Pull provider state back over the open transaction's declared changes.
    ///
    /// # Errors
    ///
    /// - `NoOpenTransaction` when no transaction is open
    /// - `ConcurrencyConflict` when a commit is running
    /// - the sync error; the transaction stays open so the rollback can be retried
    pub async fn rollback(&self, ctx: &RequestContext) -> Result<RollbackResult> {
        let start = Instant::now();
        log_op_start!("rollback", request_id = %ctx.request_id);

        let result = self.run_rollback(ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(rolled_back) => log_op_end!(
                "rollback",
                duration_ms = duration_ms,
                transaction_id = %rolled_back.transaction_id
            ),
            Err(e) => log_op_error!("rollback", e.clone(), duration_ms = duration_ms),
        }
        result
    }

    async fn run_rollback(&self, ctx: &RequestContext) -> Result<RollbackResult> {
        let open = self
            .store
            .with_conn(|conn| audit_log::open_transaction(conn))?
            .ok_or(DriftError::NoOpenTransaction)?;
        let transaction_id = open.transaction_id.unwrap_or_default();

        let ticket = self.acquire(ctx, false, false, "rollback").await?;
        let outcome = async {
            let installed = self.installed_modules()?;
            self.reconcile_modules(ctx, &installed, self.reconcile_options(ReconcileOptions::sync()))
                .await
        }
        .await;
        let finished = self.finish(ctx, &ticket, outcome.as_ref().err(), outcome.is_ok());
        let sync = settle(outcome, finished)?;

        Ok(RollbackResult {
            transaction_id,
            sync,
        })
    }

    /// Take the commit marker, polling with backoff when `force` is set
    pub(crate) async fn acquire(
        &self,
        ctx: &RequestContext,
        preview: bool,
        force: bool,
        op: &str,
    ) -> Result<CommitTicket> {
        let actor = self.actor(ctx);
        let attempts = if force {
            self.config.transaction.commit_queue_max_attempts.max(1)
        } else {
            1
        };

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.transaction.backoff(attempt - 1)).await;
            }
            let acquired = self.store.with_conn(|conn| {
                let transaction = audit_log::open_transaction(conn)?.and_then(|e| e.transaction_id);
                let commit_id = transaction
                    .clone()
                    .unwrap_or_else(|| Uuid::now_v7().to_string());
                let Some(marker_id) =
                    audit_log::try_start_commit(conn, actor, Some(&commit_id), preview)?
                else {
                    return Ok(None);
                };
                audit_log::set_context(conn, actor, Some(&commit_id))?;
                Ok(Some(CommitTicket {
                    marker_id,
                    commit_id,
                    preview,
                    transaction,
                }))
            })?;

            if let Some(ticket) = acquired {
                debug!(op, marker_id = ticket.marker_id, commit_id = %ticket.commit_id, "commit marker held");
                return Ok(ticket);
            }
            debug!(op, attempt, "commit marker busy");
        }

        Err(DriftError::ConcurrencyConflict {
            reason: if force {
                format!("commit queue exhausted after {} attempts", attempts)
            } else {
                "another commit is running".to_string()
            },
        })
    }

    /// Write the closing bracket for `ticket`: `ERROR` on failure, the end
    /// marker, and `CLOSE_TXN` when `close_transaction` is set
    pub(crate) fn finish(
        &self,
        ctx: &RequestContext,
        ticket: &CommitTicket,
        failure: Option<&DriftError>,
        close_transaction: bool,
    ) -> Result<()> {
        let actor = self.actor(ctx);
        let end = if ticket.preview {
            ChangeKind::PreviewEndCommit
        } else {
            ChangeKind::EndCommit
        };

        self.store.with_conn(|conn| {
            if let Some(err) = failure {
                audit_log::append_marker(
                    conn,
                    ChangeKind::Error,
                    actor,
                    Some(&ticket.commit_id),
                    Some(&err.to_string()),
                )?;
            }
            audit_log::append_marker(conn, end, actor, Some(&ticket.commit_id), None)?;

            match (&ticket.transaction, close_transaction) {
                (Some(transaction), true) => {
                    audit_log::close_transaction(conn, actor, transaction)?;
                }
                (Some(transaction), false) => {
                    audit_log::set_context(conn, actor, Some(transaction))?;
                }
                (None, _) => audit_log::set_context(conn, actor, None)?,
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Tables touched between the previous `START_COMMIT` and `marker_id`
    fn commit_window(&self, marker_id: i64) -> Result<CommitWindow> {
        let window = self.store.with_conn(|conn| {
            let previous = audit_log::query(
                conn,
                &AuditQuery::new()
                    .kinds(&[ChangeKind::StartCommit])
                    .before(marker_id)
                    .newest_first()
                    .limit(1),
            )?
            .pop()
            .map(|e| e.id)
            .unwrap_or(0);

            let tables: BTreeSet<String> = audit_log::query(
                conn,
                &AuditQuery::row_changes().after(previous).before(marker_id),
            )?
            .into_iter()
            .filter_map(|e| e.table_name)
            .collect();

            // Outside a transaction only changes since the last finished
            // commit are replayed; earlier sync writes stay put
            let last_end = audit_log::query(
                conn,
                &AuditQuery::new()
                    .kinds(&[ChangeKind::EndCommit])
                    .before(marker_id)
                    .newest_first()
                    .limit(1),
            )?
            .pop()
            .map(|e| e.id)
            .unwrap_or(0);
            let replay_from = audit_log::open_transaction(conn)?
                .map(|e| e.id)
                .unwrap_or(previous.max(last_end));

            Ok(CommitWindow {
                tables: tables.into_iter().collect(),
                replay_from,
            })
        })?;
        Ok(window)
    }

    /// Names of installed modules, each checked against the registry
    pub(crate) fn installed_modules(&self) -> Result<Vec<String>> {
        let installed = self.store.with_conn(|conn| modules::installed_modules(conn))?;
        installed
            .into_iter()
            .map(|m| match self.registry.get(&m.name) {
                Some(_) => Ok(m.name),
                None => Err(DriftError::UnknownModule { name: m.name }),
            })
            .collect()
    }

    /// Reconcile the drivers of `modules`, root tables first
    pub(crate) async fn reconcile_modules(
        &self,
        ctx: &RequestContext,
        modules: &[String],
        options: ReconcileOptions,
    ) -> Result<ReconcileOutcome> {
        let drivers = self.registry.drivers_in_order(modules)?;
        reconcile(&drivers, ctx, &options).await
    }
}

/// Combine an operation's outcome with the bracket write that follows it;
/// the operation's own error wins
pub(crate) fn settle<T>(outcome: Result<T>, finished: Result<()>) -> Result<T> {
    match (outcome, finished) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(marker_err)) => {
            warn!(error = %marker_err, "closing marker not written");
            Err(e)
        }
    }
}
