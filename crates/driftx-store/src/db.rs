//! SQLite connections for the record store

use crate::errors::{from_rusqlite, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Commits serialize on the audit log, so writers wait rather than fail fast
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;";

pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    Connection::open(path).map_err(from_rusqlite)
}

/// Private database; WAL silently stays `memory`
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(from_rusqlite)
}

pub fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT).map_err(from_rusqlite)?;
    // journal_mode answers with a row, which execute() rejects
    conn.execute_batch(PRAGMAS).map_err(from_rusqlite)
}
