//! Installed-module bookkeeping (`driftx_module` table)

use crate::audit_log::now_ts;
use crate::errors::{from_rusqlite, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// One row of `driftx_module`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModule {
    pub name: String,
    pub version: String,
    pub installed_at: String,
}

/// Installed modules in name order
pub fn installed_modules(conn: &Connection) -> Result<Vec<InstalledModule>> {
    let mut stmt = conn
        .prepare("SELECT name, version, installed_at FROM driftx_module ORDER BY name")
        .map_err(from_rusqlite)?;
    let modules = stmt
        .query_map([], |row| {
            Ok(InstalledModule {
                name: row.get(0)?,
                version: row.get(1)?,
                installed_at: row.get(2)?,
            })
        })
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;
    Ok(modules)
}

pub fn installed_module(conn: &Connection, name: &str) -> Result<Option<InstalledModule>> {
    conn.query_row(
        "SELECT name, version, installed_at FROM driftx_module WHERE name = ?",
        [name],
        |row| {
            Ok(InstalledModule {
                name: row.get(0)?,
                version: row.get(1)?,
                installed_at: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(from_rusqlite)
}

/// Mark `name` installed at `version`, replacing any earlier version
pub fn record_install(conn: &Connection, name: &str, version: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO driftx_module (name, version, installed_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET version = excluded.version, installed_at = excluded.installed_at",
        rusqlite::params![name, version, now_ts()],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

/// Forget `name`; returns whether it was installed
pub fn record_uninstall(conn: &Connection, name: &str) -> Result<bool> {
    let removed = conn
        .execute("DELETE FROM driftx_module WHERE name = ?", [name])
        .map_err(from_rusqlite)?;
    Ok(removed > 0)
}
