//! Diff output types.

use serde::{Deserialize, Serialize};

/// Classified delta between a declared and an observed collection.
///
/// Every element is sorted by identity, so two runs over the same inputs
/// produce identical output regardless of input order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Delta<T> {
    /// Present on the declared side only
    pub only_in_declared: Vec<T>,
    /// Present on the observed side only
    pub only_in_observed: Vec<T>,
    /// Same identity on both sides, unequal values: `(declared, observed)`
    pub changed: Vec<(T, T)>,
}

impl<T> Delta<T> {
    /// True when both sides agree
    pub fn is_empty(&self) -> bool {
        self.only_in_declared.is_empty()
            && self.only_in_observed.is_empty()
            && self.changed.is_empty()
    }

    /// Aggregate sizes used by stall detection
    pub fn counts(&self) -> DeltaCounts {
        DeltaCounts {
            only_in_declared: self.only_in_declared.len(),
            only_in_observed: self.only_in_observed.len(),
            changed: self.changed.len(),
        }
    }
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self {
            only_in_declared: Vec::new(),
            only_in_observed: Vec::new(),
            changed: Vec::new(),
        }
    }
}

/// Sizes of the three delta buckets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeltaCounts {
    pub only_in_declared: usize,
    pub only_in_observed: usize,
    pub changed: usize,
}

impl DeltaCounts {
    pub fn total(&self) -> usize {
        self.only_in_declared + self.only_in_observed + self.changed
    }
}

impl std::ops::Add for DeltaCounts {
    type Output = DeltaCounts;

    fn add(self, rhs: Self) -> Self::Output {
        DeltaCounts {
            only_in_declared: self.only_in_declared + rhs.only_in_declared,
            only_in_observed: self.only_in_observed + rhs.only_in_observed,
            changed: self.changed + rhs.changed,
        }
    }
}

impl std::ops::AddAssign for DeltaCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
