//! Concurrent retrying executor.
//!
//! Runs a batch of independent async actions, then reruns only the ones that
//! failed, until none fail or a round fails exactly as many actions as the
//! round before it.
//!
//! Ordering dependencies that the module graph does not capture (a route
//! that must exist before its association, say) surface as transient
//! provider errors and resolve across rounds. There is no execution DAG:
//! convergence is statistical.

use crate::errors::{DriverError, ForwardProgressError};
use futures::future::{join_all, BoxFuture, FutureExt};
use std::future::Future;
use tracing::{debug, warn};

/// Boxed future returned by one attempt of an action
pub type ActionFuture = BoxFuture<'static, Result<(), DriverError>>;

/// A named, re-runnable async action
pub struct LazyAction {
    label: String,
    run: Box<dyn Fn() -> ActionFuture + Send + Sync>,
}

impl LazyAction {
    /// Wrap a closure producing a fresh future for every attempt
    pub fn new<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(move || f().boxed()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for LazyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LazyReport {
    pub rounds: usize,
    /// Actions that completed, each exactly once
    pub executed: usize,
}

/// Run `actions` to completion.
///
/// Each round polls every pending action concurrently. Successful actions
/// are dropped; failed ones form the next round.
///
/// # Errors
///
/// `ForwardProgressError` listing the unresolved actions and their final
/// errors when two consecutive rounds fail the same number of actions.
pub async fn run_lazy(actions: Vec<LazyAction>) -> Result<LazyReport, ForwardProgressError> {
    let total = actions.len();
    let mut pending = actions;
    let mut previous_failures: Option<usize> = None;
    let mut rounds = 0;

    while !pending.is_empty() {
        rounds += 1;
        let results = join_all(pending.iter().map(|a| (a.run)())).await;

        let mut failed = Vec::new();
        let mut errors = Vec::new();
        for (action, result) in pending.into_iter().zip(results) {
            if let Err(err) = result {
                failed.push(action);
                errors.push(err);
            }
        }

        debug!(
            op = "lazy_loader",
            round = rounds,
            failed = failed.len(),
            "round finished"
        );

        if failed.is_empty() {
            break;
        }

        if previous_failures == Some(failed.len()) {
            let remaining: Vec<String> = failed.iter().map(|a| a.label.clone()).collect();
            warn!(
                op = "lazy_loader",
                round = rounds,
                remaining = remaining.len(),
                "no forward progress"
            );
            return Err(ForwardProgressError {
                remaining,
                last_errors: errors,
                rounds,
            });
        }

        previous_failures = Some(failed.len());
        pending = failed;
    }

    Ok(LazyReport {
        rounds,
        executed: total,
    })
}
