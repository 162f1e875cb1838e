//! Diff engine.
//!
//! Compares a declared and an observed collection of same-typed entities
//! using caller-supplied identity and equality, producing a classified
//! [`Delta`].
//!
//! ## Entry point
//!
//! ```
//! use driftx_core::diff::diff;
//!
//! let declared = vec![("net-1", 16), ("net-2", 24)];
//! let observed = vec![("net-2", 20), ("net-3", 24)];
//! let delta = diff(&declared, &observed, |e| e.0.to_string(), |a, b| a.1 == b.1);
//!
//! assert_eq!(delta.only_in_declared, vec![("net-1", 16)]);
//! assert_eq!(delta.only_in_observed, vec![("net-3", 24)]);
//! assert_eq!(delta.changed, vec![(("net-2", 24), ("net-2", 20))]);
//! ```
//!
//! ## Guarantees
//!
//! - **Partition**: every input lands in exactly one bucket or is dropped as unchanged.
//! - **Idempotence**: `diff(a, a)` is empty.
//! - **Determinism**: buckets are ordered by identity, not by input order.

pub mod engine;
pub mod model;

pub use engine::diff;
pub use model::{Delta, DeltaCounts};
