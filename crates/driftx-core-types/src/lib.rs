//! Core types shared across driftx facilities
//!
//! This crate provides foundational types used by the error, logging and
//! audit facilities:
//!
//! - **Correlation types**: RequestId, TraceId, TransactionId, RequestContext
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;

pub use correlation::{RequestContext, RequestId, TraceId, TransactionId};
