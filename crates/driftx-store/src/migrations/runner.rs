use super::embedded::{Migration, MIGRATIONS};
use crate::errors::{checksum_mismatch, from_rusqlite, migration_error, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use tracing::{debug, info};

const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY,
    migration_id TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL,
    checksum TEXT NOT NULL
)";

/// Bring the store schema up to date.
///
/// # Errors
///
/// `migration_checksum` when an applied migration no longer matches its
/// embedded SQL; `migration` when pending SQL fails (that migration is rolled
/// back, earlier ones stay).
pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(LEDGER_DDL).map_err(from_rusqlite)?;
    let recorded = recorded_checksums(conn)?;

    let mut pending = Vec::new();
    for migration in MIGRATIONS {
        let checksum = migration.checksum();
        match recorded.get(migration.id) {
            Some(stored) if *stored != checksum => {
                return Err(checksum_mismatch(migration.id, stored, &checksum));
            }
            Some(_) => debug!(migration_id = migration.id, "already applied"),
            None => pending.push((migration, checksum)),
        }
    }

    for (migration, checksum) in pending {
        run_one(conn, migration, &checksum)?;
    }
    Ok(())
}

/// Applied migration ids, oldest first
pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT migration_id FROM schema_version ORDER BY id")
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(from_rusqlite)?;
    rows.collect::<std::result::Result<_, _>>()
        .map_err(from_rusqlite)
}

fn recorded_checksums(conn: &Connection) -> Result<BTreeMap<String, String>> {
    let mut stmt = conn
        .prepare("SELECT migration_id, checksum FROM schema_version")
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(from_rusqlite)?;
    rows.collect::<std::result::Result<_, _>>()
        .map_err(from_rusqlite)
}

fn run_one(conn: &mut Connection, migration: &Migration, checksum: &str) -> Result<()> {
    let tx = conn.transaction().map_err(from_rusqlite)?;
    tx.execute_batch(migration.sql)
        .map_err(|e| migration_error(migration.id, &e.to_string()))?;
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?1, ?2, ?3)",
        params![migration.id, chrono::Utc::now().to_rfc3339(), checksum],
    )
    .map_err(from_rusqlite)?;
    tx.commit().map_err(from_rusqlite)?;

    info!(migration_id = migration.id, "migration applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_second_run_applies_nothing() {
        let mut conn = migrated();
        apply_migrations(&mut conn).unwrap();
        assert_eq!(
            applied_migrations(&conn).unwrap(),
            vec!["001_audit_log", "002_modules"]
        );
    }

    #[test]
    fn test_tampered_checksum_blocks_startup() {
        let mut conn = migrated();
        conn.execute(
            "UPDATE schema_version SET checksum = 'bogus' WHERE migration_id = '001_audit_log'",
            [],
        )
        .unwrap();

        let err = apply_migrations(&mut conn).unwrap_err();
        assert_eq!(err.op(), Some("migration_checksum"));
    }

    #[test]
    fn test_missing_migration_is_applied_later() {
        let mut conn = migrated();
        conn.execute_batch(
            "DROP TABLE driftx_module; DELETE FROM schema_version WHERE migration_id = '002_modules';",
        )
        .unwrap();

        apply_migrations(&mut conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'driftx_module'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }
}
