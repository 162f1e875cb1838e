//! Schema of the record store's own bookkeeping tables.
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_version` with the checksum of its SQL. Startup refuses a database
//! whose recorded checksums disagree with the embedded SQL, before anything
//! pending is applied.

mod embedded;
mod runner;

pub use runner::{applied_migrations, apply_migrations};
