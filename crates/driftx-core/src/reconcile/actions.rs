use crate::diff::Delta;
use crate::driver::{PassContext, ResourceDriver, UpdateOrReplace};
use crate::errors::DriverError;
use crate::lazy_loader::LazyAction;
use crate::model::Record;
use crate::plan::{CrupdePlan, PlanAction, PlanEntry};
use crate::reconcile::Direction;
use std::sync::{Arc, Mutex};

/// Authoritative fields returned by a successful create/update
#[derive(Debug)]
pub(crate) struct WriteBack {
    pub table_index: usize,
    pub identity: String,
    pub returned: Record,
}

pub(crate) type WriteBackSink = Arc<Mutex<Vec<WriteBack>>>;

#[derive(Debug, Clone)]
enum Step {
    CloudCreate(Record),
    CloudUpdate { desired: Record, current: Record },
    CloudDelete(Record),
    DbCreate(Record),
    DbUpdate { desired: Record, current: Record },
    DbDelete(Record),
}

impl Step {
    fn verb(&self) -> &'static str {
        match self {
            Step::CloudCreate(_) | Step::DbCreate(_) => "create",
            Step::CloudUpdate { .. } | Step::DbUpdate { .. } => "update",
            Step::CloudDelete(_) | Step::DbDelete(_) => "delete",
        }
    }

    async fn perform(
        &self,
        driver: &dyn ResourceDriver,
        ctx: &PassContext,
    ) -> Result<Option<Record>, DriverError> {
        match self {
            Step::CloudCreate(r) => driver.cloud_create(ctx, r).await.map(Some),
            Step::CloudUpdate { desired, current } => {
                driver.cloud_update(ctx, desired, current).await.map(Some)
            }
            Step::CloudDelete(r) => driver.cloud_delete(ctx, r).await.map(|_| None),
            Step::DbCreate(r) => driver.db_create(ctx, r).await.map(Some),
            Step::DbUpdate { desired, current } => {
                driver.db_update(ctx, desired, current).await.map(Some)
            }
            Step::DbDelete(r) => driver.db_delete(ctx, r).await.map(|_| None),
        }
    }
}

/// Plan for one table's delta, from the point of view of the side being written
pub(crate) fn plan_table(
    direction: Direction,
    driver: &dyn ResourceDriver,
    delta: &Delta<Record>,
    plan: &mut CrupdePlan,
) {
    let table = driver.table();
    let entry = |r: &Record| PlanEntry::new(driver.identity(r), driver.describe(r));

    let (to_create, to_delete) = match direction {
        Direction::Apply => (&delta.only_in_declared, &delta.only_in_observed),
        Direction::Sync => (&delta.only_in_observed, &delta.only_in_declared),
    };
    for r in to_create {
        plan.push(PlanAction::Create, table, entry(r));
    }
    for (declared, observed) in &delta.changed {
        let desired = match direction {
            Direction::Apply => declared,
            Direction::Sync => observed,
        };
        let action = match driver.update_or_replace(declared, observed) {
            UpdateOrReplace::Update => PlanAction::Update,
            UpdateOrReplace::Replace => PlanAction::Replace,
        };
        plan.push(action, table, entry(desired));
    }
    for r in to_delete {
        plan.push(PlanAction::Delete, table, entry(r));
    }
}

fn lazy_step(
    table_index: usize,
    identity: String,
    driver: Arc<dyn ResourceDriver>,
    ctx: Arc<PassContext>,
    step: Step,
    sink: Option<WriteBackSink>,
) -> LazyAction {
    let label = format!("{} {} {}", step.verb(), driver.table(), identity);
    LazyAction::new(label, move || {
        let driver = driver.clone();
        let ctx = ctx.clone();
        let step = step.clone();
        let sink = sink.clone();
        let identity = identity.clone();
        async move {
            let returned = step
                .perform(driver.as_ref(), &ctx)
                .await
                .map_err(|e| {
                    if e.entity_id.is_some() {
                        e
                    } else {
                        e.with_entity_id(identity.clone())
                    }
                })?;
            if let (Some(sink), Some(returned)) = (sink, returned) {
                if let Ok(mut pending) = sink.lock() {
                    pending.push(WriteBack {
                        table_index,
                        identity,
                        returned,
                    });
                }
            }
            Ok(())
        }
    })
}

/// One batch of actions for every table's delta.
///
/// Creates and updates come first in table order, deletes follow in reverse
/// table order. A replace contributes a create to the first group and a
/// delete to the second. Apply-direction creates/updates report their
/// results to `sink`.
pub(crate) fn build_actions(
    direction: Direction,
    drivers: &[Arc<dyn ResourceDriver>],
    deltas: &[Delta<Record>],
    ctx: &Arc<PassContext>,
    sink: &WriteBackSink,
) -> Vec<LazyAction> {
    let mut upserts = Vec::new();
    let mut deletes_by_table: Vec<Vec<LazyAction>> = Vec::with_capacity(drivers.len());

    for (i, (driver, delta)) in drivers.iter().zip(deltas).enumerate() {
        let mut deletes = Vec::new();
        let writes_back = match direction {
            Direction::Apply => Some(sink.clone()),
            Direction::Sync => None,
        };
        let make = |id: String, step: Step, sink: Option<WriteBackSink>| {
            lazy_step(i, id, driver.clone(), ctx.clone(), step, sink)
        };

        match direction {
            Direction::Apply => {
                for r in &delta.only_in_declared {
                    upserts.push(make(
                        driver.identity(r),
                        Step::CloudCreate(r.clone()),
                        writes_back.clone(),
                    ));
                }
                for r in &delta.only_in_observed {
                    deletes.push(make(driver.identity(r), Step::CloudDelete(r.clone()), None));
                }
            }
            Direction::Sync => {
                for r in &delta.only_in_observed {
                    upserts.push(make(driver.identity(r), Step::DbCreate(r.clone()), None));
                }
                for r in &delta.only_in_declared {
                    deletes.push(make(driver.identity(r), Step::DbDelete(r.clone()), None));
                }
            }
        }

        for (declared, observed) in &delta.changed {
            let id = driver.identity(declared);
            let replace =
                driver.update_or_replace(declared, observed) == UpdateOrReplace::Replace;
            match (direction, replace) {
                (Direction::Apply, false) => upserts.push(make(
                    id,
                    Step::CloudUpdate {
                        desired: declared.clone(),
                        current: observed.clone(),
                    },
                    writes_back.clone(),
                )),
                (Direction::Apply, true) => {
                    upserts.push(make(
                        id.clone(),
                        Step::CloudCreate(declared.clone()),
                        writes_back.clone(),
                    ));
                    deletes.push(make(id, Step::CloudDelete(observed.clone()), None));
                }
                (Direction::Sync, false) => upserts.push(make(
                    id,
                    Step::DbUpdate {
                        desired: observed.clone(),
                        current: declared.clone(),
                    },
                    None,
                )),
                (Direction::Sync, true) => {
                    upserts.push(make(id.clone(), Step::DbCreate(observed.clone()), None));
                    deletes.push(make(id, Step::DbDelete(declared.clone()), None));
                }
            }
        }

        deletes_by_table.push(deletes);
    }

    upserts.extend(deletes_by_table.into_iter().rev().flatten());
    upserts
}
