//! Outer/inner fixed-point loop.

use crate::diff::{diff, Delta, DeltaCounts};
use crate::driver::{PassContext, ResourceDriver, TableIndex};
use crate::errors::{DriftError, DriverError, ForwardProgressError, Result, StallSource};
use crate::lazy_loader::{run_lazy, LazyAction};
use crate::model::Record;
use crate::plan::CrupdePlan;
use crate::reconcile::actions::{build_actions, plan_table, WriteBack, WriteBackSink};
use crate::reconcile::{Direction, ReconcileOptions, ReconcileOutcome};
use crate::{log_op_end, log_op_error, log_op_start};
use driftx_core_types::RequestContext;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Store,
    Provider,
}

impl Side {
    fn as_str(self) -> &'static str {
        match self {
            Side::Store => "store",
            Side::Provider => "provider",
        }
    }
}

/// One slot per driver, filled by the read that succeeded
type ReadSlots = Arc<Mutex<Vec<Option<Vec<Record>>>>>;

/// Bring the two sides of `drivers` into agreement.
///
/// `drivers` must be in table dependency order (referenced tables first).
///
/// Outer iteration: snapshot the authoritative side. Inner iteration:
/// re-read the other side, diff every table, and execute the resulting plan
/// as one lazy batch. The inner loop ends when a diff comes back empty; the
/// outer loop runs again whenever its inner loop executed anything.
///
/// Reads go through the same retrying executor as writes, so a throttled
/// read is simply tried again next round.
///
/// # Errors
///
/// - `ForwardProgress` when the diff counts stay identical for
///   `stall_threshold` consecutive inner iterations (carries the stuck plan
///   and the executor's last failures), when a table read keeps failing, or
///   when more than `stall_threshold` consecutive outer passes all had to
///   execute actions
/// - `Driver` when persisting provider-assigned fields fails
pub async fn reconcile(
    drivers: &[Arc<dyn ResourceDriver>],
    request: &RequestContext,
    options: &ReconcileOptions,
) -> Result<ReconcileOutcome> {
    let start = Instant::now();
    let op = options.direction.as_str();
    log_op_start!(
        op,
        request_id = %request.request_id,
        tables = drivers.len(),
        preview = options.preview
    );

    let result = Reconciler {
        drivers,
        request,
        options,
    }
    .run()
    .await;

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(outcome) => {
            let counts = outcome.plan().counts();
            log_op_end!(
                op,
                duration_ms = duration_ms,
                to_create = counts.create,
                to_update = counts.update,
                to_replace = counts.replace,
                to_delete = counts.delete
            );
        }
        Err(err) => {
            log_op_error!(op, err.clone(), duration_ms = duration_ms);
        }
    }
    result
}

enum InnerOutcome {
    Preview(CrupdePlan),
    Done { executed: bool },
}

struct Reconciler<'a> {
    drivers: &'a [Arc<dyn ResourceDriver>],
    request: &'a RequestContext,
    options: &'a ReconcileOptions,
}

impl Reconciler<'_> {
    async fn run(&self) -> Result<ReconcileOutcome> {
        if self.drivers.is_empty() {
            return Ok(ReconcileOutcome::NothingToDo);
        }

        let mut executed_plan = CrupdePlan::new();
        let mut executing_passes = 0usize;
        let mut outer = 0usize;

        loop {
            outer += 1;
            let mut authoritative = self.read_side(self.authoritative_side(), 0).await?;
            debug!(op = self.options.direction.as_str(), outer, "authoritative snapshot read");

            match self
                .inner_loop(&mut authoritative, &mut executed_plan)
                .await?
            {
                InnerOutcome::Preview(plan) => return Ok(ReconcileOutcome::Preview(plan)),
                InnerOutcome::Done { executed: false } => break,
                InnerOutcome::Done { executed: true } => {
                    executing_passes += 1;
                    if executing_passes > self.options.stall_threshold {
                        return Err(self.outer_stall_error(executing_passes, executed_plan));
                    }
                    info!(
                        op = self.options.direction.as_str(),
                        outer, "pass executed actions; re-reading authoritative side"
                    );
                }
            }
        }

        if executing_passes > 0 {
            Ok(ReconcileOutcome::Converged(executed_plan))
        } else {
            Ok(ReconcileOutcome::NothingToDo)
        }
    }

    fn authoritative_side(&self) -> Side {
        match self.options.direction {
            Direction::Apply => Side::Store,
            Direction::Sync => Side::Provider,
        }
    }

    fn other_side(&self) -> Side {
        match self.authoritative_side() {
            Side::Store => Side::Provider,
            Side::Provider => Side::Store,
        }
    }

    async fn read_side(&self, side: Side, iteration: usize) -> Result<Vec<Vec<Record>>> {
        let ctx = Arc::new(PassContext::for_read(self.request.clone(), iteration));
        let slots: ReadSlots = Arc::new(Mutex::new(vec![None; self.drivers.len()]));
        let reads = self
            .drivers
            .iter()
            .enumerate()
            .map(|(i, d)| read_action(i, side, d.clone(), ctx.clone(), slots.clone()))
            .collect();

        if let Err(stalled) = run_lazy(reads).await {
            warn!(
                op = self.options.direction.as_str(),
                side = side.as_str(),
                unresolved = stalled.remaining.len(),
                "reads kept failing"
            );
            return Err(self.read_stall_error(side, stalled));
        }

        let mut filled = slots.lock().map_err(|_| DriftError::Internal {
            message: "read buffer poisoned".to_string(),
        })?;
        let tables = filled
            .iter_mut()
            .map(|slot| {
                slot.take().ok_or_else(|| DriftError::Internal {
                    message: "table read finished without rows".to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(tables)
    }

    async fn inner_loop(
        &self,
        authoritative: &mut [Vec<Record>],
        executed_plan: &mut CrupdePlan,
    ) -> Result<InnerOutcome> {
        let direction = self.options.direction;
        let mut last_counts: Option<DeltaCounts> = None;
        let mut unchanged = 0usize;
        let mut last_errors: Vec<DriverError> = Vec::new();
        let mut last_remaining: Vec<String> = Vec::new();
        let mut executed = false;
        let mut iteration = 0usize;

        loop {
            iteration += 1;
            let other = self.read_side(self.other_side(), iteration).await?;
            let (store, provider): (&[Vec<Record>], &[Vec<Record>]) = match direction {
                Direction::Apply => (&*authoritative, other.as_slice()),
                Direction::Sync => (other.as_slice(), &*authoritative),
            };

            let deltas: Vec<Delta<Record>> = self
                .drivers
                .iter()
                .enumerate()
                .map(|(i, d)| {
                    diff(
                        &store[i],
                        &provider[i],
                        |r| d.identity(r),
                        |a, b| d.equals(a, b),
                    )
                })
                .collect();

            let mut plan = CrupdePlan::new();
            for (d, delta) in self.drivers.iter().zip(&deltas) {
                plan_table(direction, d.as_ref(), delta, &mut plan);
            }
            let counts = deltas
                .iter()
                .fold(DeltaCounts::default(), |acc, d| acc + d.counts());

            debug!(
                op = direction.as_str(),
                iteration,
                only_in_declared = counts.only_in_declared,
                only_in_observed = counts.only_in_observed,
                changed = counts.changed,
                "diff computed"
            );

            if plan.is_empty() {
                return Ok(InnerOutcome::Done { executed });
            }
            if self.options.preview {
                return Ok(InnerOutcome::Preview(plan));
            }

            if last_counts == Some(counts) {
                unchanged += 1;
            } else {
                last_counts = Some(counts);
                unchanged = 1;
            }
            if unchanged >= self.options.stall_threshold {
                return Err(self.stall_error(counts, plan, last_remaining, last_errors));
            }

            let ctx = Arc::new(self.pass_context(iteration, store, provider));
            let sink: WriteBackSink = Arc::new(Mutex::new(Vec::new()));
            let actions = build_actions(direction, self.drivers, &deltas, &ctx, &sink);
            let batch = actions.len();

            match run_lazy(actions).await {
                Ok(report) => {
                    debug!(
                        op = direction.as_str(),
                        iteration,
                        actions = batch,
                        rounds = report.rounds,
                        "batch executed"
                    );
                    last_errors.clear();
                    last_remaining.clear();
                }
                Err(stalled) => {
                    warn!(
                        op = direction.as_str(),
                        iteration,
                        actions = batch,
                        unresolved = stalled.remaining.len(),
                        "batch left actions unresolved"
                    );
                    last_errors = stalled.last_errors;
                    last_remaining = stalled.remaining;
                }
            }
            executed = true;
            executed_plan.merge(&plan);

            if direction == Direction::Apply {
                let returned = take_write_backs(&sink)?;
                self.write_back(&ctx, authoritative, returned).await?;
            }
        }
    }

    fn pass_context(
        &self,
        iteration: usize,
        store: &[Vec<Record>],
        provider: &[Vec<Record>],
    ) -> PassContext {
        let mut declared = TableIndex::new();
        let mut observed = TableIndex::new();
        for (i, d) in self.drivers.iter().enumerate() {
            declared.insert_table(d.table(), store[i].clone(), |r| d.identity(r));
            observed.insert_table(d.table(), provider[i].clone(), |r| d.identity(r));
        }
        PassContext {
            request: self.request.clone(),
            iteration,
            declared: Arc::new(declared),
            observed: Arc::new(observed),
        }
    }

    /// Copy provider-assigned columns into the in-memory store snapshot and
    /// persist them, so the next diff starts from what the provider returned
    async fn write_back(
        &self,
        ctx: &PassContext,
        authoritative: &mut [Vec<Record>],
        returned: Vec<WriteBack>,
    ) -> Result<()> {
        for wb in returned {
            let driver = &self.drivers[wb.table_index];
            let schema = driver.schema();
            let Some(record) = authoritative[wb.table_index]
                .iter_mut()
                .find(|r| driver.identity(r) == wb.identity)
            else {
                continue;
            };

            let original = record.clone();
            for column in schema
                .columns
                .iter()
                .filter(|c| c.generated && !schema.is_surrogate_key(&c.name))
            {
                if let Some(value) = wb.returned.get(&column.name) {
                    record.set(column.name.clone(), value.clone());
                }
            }

            if *record != original {
                debug!(
                    table = driver.table(),
                    entity_id = %wb.identity,
                    "writing back provider-assigned fields"
                );
                *record = driver.db_update(ctx, record, &original).await?;
            }
        }
        Ok(())
    }

    fn read_stall_error(&self, side: Side, stalled: ForwardProgressError) -> DriftError {
        DriftError::ForwardProgress {
            phase: self.options.direction.as_str().to_string(),
            source_kind: StallSource::Executor,
            detail: format!(
                "{} reads still failing after {} rounds",
                side.as_str(),
                stalled.rounds
            ),
            remaining: stalled.remaining,
            last_errors: stalled.last_errors,
            plan: Box::new(CrupdePlan::new()),
        }
    }

    fn outer_stall_error(&self, passes: usize, plan: CrupdePlan) -> DriftError {
        DriftError::ForwardProgress {
            phase: self.options.direction.as_str().to_string(),
            source_kind: StallSource::Passes,
            detail: format!(
                "authoritative side changed on {} consecutive passes",
                passes
            ),
            remaining: Vec::new(),
            last_errors: Vec::new(),
            plan: Box::new(plan),
        }
    }

    fn stall_error(
        &self,
        counts: DeltaCounts,
        plan: CrupdePlan,
        remaining: Vec<String>,
        last_errors: Vec<DriverError>,
    ) -> DriftError {
        let source_kind = if last_errors.is_empty() {
            StallSource::Diff
        } else {
            StallSource::Executor
        };
        let remaining = if remaining.is_empty() {
            [
                &plan.to_create,
                &plan.to_update,
                &plan.to_replace,
                &plan.to_delete,
            ]
            .into_iter()
            .flat_map(|bucket| bucket.values().flatten().map(|e| e.id.clone()))
            .collect()
        } else {
            remaining
        };
        DriftError::ForwardProgress {
            phase: self.options.direction.as_str().to_string(),
            source_kind,
            detail: format!(
                "diff counts (only in declared {}, only in observed {}, changed {}) unchanged for {} iterations",
                counts.only_in_declared,
                counts.only_in_observed,
                counts.changed,
                self.options.stall_threshold
            ),
            remaining,
            last_errors,
            plan: Box::new(plan),
        }
    }
}

fn read_action(
    index: usize,
    side: Side,
    driver: Arc<dyn ResourceDriver>,
    ctx: Arc<PassContext>,
    slots: ReadSlots,
) -> LazyAction {
    let label = format!("read {} {}", side.as_str(), driver.table());
    LazyAction::new(label, move || {
        let driver = driver.clone();
        let ctx = ctx.clone();
        let slots = slots.clone();
        async move {
            let rows = match side {
                Side::Store => driver.db_read(&ctx, None).await,
                Side::Provider => driver.cloud_read(&ctx, None).await,
            }?;
            let mut slots = slots
                .lock()
                .map_err(|_| DriverError::new(driver.table(), "read buffer poisoned"))?;
            slots[index] = Some(rows);
            Ok(())
        }
    })
}

fn take_write_backs(sink: &WriteBackSink) -> Result<Vec<WriteBack>> {
    let mut pending = sink.lock().map_err(|_| DriftError::Internal {
        message: "write-back buffer poisoned".to_string(),
    })?;
    Ok(std::mem::take(&mut *pending))
}
