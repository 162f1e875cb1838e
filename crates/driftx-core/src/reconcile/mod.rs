//! Apply / sync reconciliation loop.
//!
//! Both directions share one outer/inner fixed-point loop and differ only in
//! which side is authoritative:
//!
//! - **apply**: the record store is the source of truth; differences are
//!   pushed to the provider.
//! - **sync**: the provider is the source of truth; differences are pulled
//!   into the record store.
//!
//! The diff is always taken as `diff(store records, provider records)`;
//! direction decides which driver call each bucket maps to.

mod actions;
pub mod engine;

pub use engine::reconcile;

use crate::plan::CrupdePlan;

/// Stall threshold used when no configuration overrides it
pub const DEFAULT_STALL_THRESHOLD: usize = 4;

/// Which side is authoritative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Apply,
    Sync,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Apply => "apply",
            Direction::Sync => "sync",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for one reconciliation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub direction: Direction,
    /// Return the first pass's plan without executing anything
    pub preview: bool,
    /// Inner iterations with identical diff counts before giving up
    pub stall_threshold: usize,
}

impl ReconcileOptions {
    pub fn apply() -> Self {
        Self {
            direction: Direction::Apply,
            preview: false,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }

    pub fn sync() -> Self {
        Self {
            direction: Direction::Sync,
            ..Self::apply()
        }
    }

    pub fn with_preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    pub fn with_stall_threshold(mut self, threshold: usize) -> Self {
        self.stall_threshold = threshold.max(1);
        self
    }
}

/// Successful result of a reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Both sides already agree, or there were no tables
    NothingToDo,
    /// Preview mode: what would be executed
    Preview(CrupdePlan),
    /// Every action executed, merged across passes
    Converged(CrupdePlan),
}

impl ReconcileOutcome {
    /// The carried plan, empty for `NothingToDo`
    pub fn plan(&self) -> CrupdePlan {
        match self {
            ReconcileOutcome::NothingToDo => CrupdePlan::default(),
            ReconcileOutcome::Preview(plan) | ReconcileOutcome::Converged(plan) => plan.clone(),
        }
    }

    pub fn into_plan(self) -> CrupdePlan {
        match self {
            ReconcileOutcome::NothingToDo => CrupdePlan::default(),
            ReconcileOutcome::Preview(plan) | ReconcileOutcome::Converged(plan) => plan,
        }
    }
}
