//! Logging for every driftx crate.
//!
//! Operations bracket themselves with [`log_op_start!`](crate::log_op_start)
//! and [`log_op_end!`](crate::log_op_end) / [`log_op_error!`](crate::log_op_error);
//! everything else is plain `tracing` with the field keys from
//! `driftx_core_types::schema`. Binaries call [`init`] once with the profile
//! from their config; tests use [`init_test_capture`] instead.
//!
//! ```rust
//! use driftx_core::logging_facility::{init, Profile};
//!
//! init(Profile::Production);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile, LOG_ENV};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
