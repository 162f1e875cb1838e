//! Audit log reader and marker writer.
//!
//! Row entries are written by the change-capture triggers (see
//! [`crate::triggers`]); this module appends the bracket markers and error
//! records, and answers the window and state queries the transaction
//! controller needs.
//!
//! State is derived from the log itself:
//!
//! - a commit is running when the newest commit marker is a start marker
//! - a transaction is open when the newest `OPEN_TXN`/`CLOSE_TXN` marker is
//!   `OPEN_TXN`

use crate::errors::{from_rusqlite, serialization_error, Result};
use chrono::{SecondsFormat, Utc};
use driftx_core::audit::{AuditEntry, ChangeKind, ChangePayload};
use driftx_core::errors::{ExError, ExErrorKind};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, TransactionBehavior};
use tracing::{debug, info};

const COMMIT_MARKERS: [ChangeKind; 4] = [
    ChangeKind::StartCommit,
    ChangeKind::PreviewStartCommit,
    ChangeKind::EndCommit,
    ChangeKind::PreviewEndCommit,
];

const TXN_MARKERS: [ChangeKind; 2] = [ChangeKind::OpenTxn, ChangeKind::CloseTxn];

/// Filter over the audit log
///
/// Every bound is optional; an empty `kinds` list matches every kind.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Exclusive lower id bound
    pub after_id: Option<i64>,
    /// Exclusive upper id bound
    pub before_id: Option<i64>,
    /// Inclusive lower timestamp bound (RFC 3339)
    pub since: Option<String>,
    /// Exclusive upper timestamp bound (RFC 3339)
    pub until: Option<String>,
    pub kinds: Vec<ChangeKind>,
    pub table: Option<String>,
    pub newest_first: bool,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row changes only
    pub fn row_changes() -> Self {
        Self::new().kinds(&ChangeKind::ROW_CHANGES)
    }

    pub fn after(mut self, id: i64) -> Self {
        self.after_id = Some(id);
        self
    }

    pub fn before(mut self, id: i64) -> Self {
        self.before_id = Some(id);
        self
    }

    pub fn between(mut self, since: impl Into<String>, until: impl Into<String>) -> Self {
        self.since = Some(since.into());
        self.until = Some(until.into());
        self
    }

    pub fn kinds(mut self, kinds: &[ChangeKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(id) = self.after_id {
            conditions.push("id > ?".to_string());
            params.push(SqlValue::Integer(id));
        }
        if let Some(id) = self.before_id {
            conditions.push("id < ?".to_string());
            params.push(SqlValue::Integer(id));
        }
        if let Some(since) = &self.since {
            conditions.push("ts >= ?".to_string());
            params.push(SqlValue::Text(since.clone()));
        }
        if let Some(until) = &self.until {
            conditions.push("ts < ?".to_string());
            params.push(SqlValue::Text(until.clone()));
        }
        if !self.kinds.is_empty() {
            let placeholders = vec!["?"; self.kinds.len()].join(", ");
            conditions.push(format!("change_kind IN ({})", placeholders));
            params.extend(
                self.kinds
                    .iter()
                    .map(|k| SqlValue::Text(k.as_str().to_string())),
            );
        }
        if let Some(table) = &self.table {
            conditions.push("table_name = ?".to_string());
            params.push(SqlValue::Text(table.clone()));
        }

        let mut sql = String::from(
            "SELECT id, ts, actor, table_name, change_kind, change_json, message, transaction_id
             FROM audit_log",
        );
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(if self.newest_first {
            " ORDER BY id DESC"
        } else {
            " ORDER BY id ASC"
        });
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        (sql, params)
    }
}

type RawEntry = (
    i64,
    String,
    String,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<String>,
);

/// Entries matching `query`
pub fn query(conn: &Connection, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
    let (sql, params) = query.to_sql();
    let mut stmt = conn.prepare(&sql).map_err(from_rusqlite)?;
    let raw = stmt
        .query_map(params_from_iter(params), |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<RawEntry>, _>>()
        .map_err(from_rusqlite)?;

    raw.into_iter().map(decode).collect()
}

fn decode(raw: RawEntry) -> Result<AuditEntry> {
    let (id, ts, actor, table_name, kind, change_json, message, transaction_id) = raw;
    let change_kind: ChangeKind = kind.parse().map_err(ExError::from)?;
    let change: ChangePayload =
        serde_json::from_str(&change_json).map_err(|e| serialization_error("audit_decode", e))?;
    Ok(AuditEntry {
        id,
        ts,
        actor,
        table_name,
        change_kind,
        change,
        message,
        transaction_id,
    })
}

/// Current time in the log's timestamp format
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Append a bracket marker or error record; returns its id
///
/// # Errors
///
/// `InvalidInput` for row change kinds, which only triggers write.
pub fn append_marker(
    conn: &Connection,
    kind: ChangeKind,
    actor: &str,
    transaction_id: Option<&str>,
    message: Option<&str>,
) -> Result<i64> {
    if kind.is_row_change() {
        return Err(ExError::new(ExErrorKind::InvalidInput)
            .with_op("append_marker")
            .with_message(format!("{} entries are written by triggers", kind)));
    }

    conn.execute(
        "INSERT INTO audit_log (ts, actor, table_name, change_kind, change_json, message, transaction_id)
         VALUES (?1, ?2, NULL, ?3, '{}', ?4, ?5)",
        rusqlite::params![now_ts(), actor, kind.as_str(), message, transaction_id],
    )
    .map_err(from_rusqlite)?;
    let id = conn.last_insert_rowid();

    debug!(
        op = "append_marker",
        change_kind = kind.as_str(),
        entry_id = id,
        transaction_id = transaction_id.unwrap_or(""),
        "audit marker appended"
    );
    Ok(id)
}

/// Newest entry whose kind is one of `kinds`
pub fn last_marker(conn: &Connection, kinds: &[ChangeKind]) -> Result<Option<AuditEntry>> {
    let mut entries = query(conn, &AuditQuery::new().kinds(kinds).newest_first().limit(1))?;
    Ok(entries.pop())
}

pub fn commit_running(conn: &Connection) -> Result<bool> {
    Ok(matches!(
        last_marker(conn, &COMMIT_MARKERS)?.map(|e| e.change_kind),
        Some(ChangeKind::StartCommit) | Some(ChangeKind::PreviewStartCommit)
    ))
}

/// The `OPEN_TXN` entry of the open transaction, if one is open
pub fn open_transaction(conn: &Connection) -> Result<Option<AuditEntry>> {
    Ok(last_marker(conn, &TXN_MARKERS)?.filter(|e| e.change_kind == ChangeKind::OpenTxn))
}

pub fn transaction_open(conn: &Connection) -> Result<bool> {
    Ok(open_transaction(conn)?.is_some())
}

/// Atomically check that no commit is running and append a start marker.
///
/// Returns the marker id, or `None` when another commit holds the store.
/// The check and the insert share one `IMMEDIATE` transaction, so two
/// callers racing on the same database cannot both win.
pub fn try_start_commit(
    conn: &mut Connection,
    actor: &str,
    transaction_id: Option<&str>,
    preview: bool,
) -> Result<Option<i64>> {
    let kind = if preview {
        ChangeKind::PreviewStartCommit
    } else {
        ChangeKind::StartCommit
    };

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(from_rusqlite)?;
    if commit_running(&tx)? {
        return Ok(None);
    }
    let id = append_marker(&tx, kind, actor, transaction_id, None)?;
    tx.commit().map_err(from_rusqlite)?;

    info!(op = "commit", entry_id = id, preview, "commit marker acquired");
    Ok(Some(id))
}

/// Atomically check that no commit is running and no transaction is open,
/// then append `OPEN_TXN` and point the change-capture context at it.
///
/// Returns the marker id, or `None` when the store is busy.
pub fn try_open_transaction(
    conn: &mut Connection,
    actor: &str,
    transaction_id: &str,
) -> Result<Option<i64>> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(from_rusqlite)?;
    if commit_running(&tx)? || transaction_open(&tx)? {
        return Ok(None);
    }
    let id = append_marker(&tx, ChangeKind::OpenTxn, actor, Some(transaction_id), None)?;
    set_context(&tx, actor, Some(transaction_id))?;
    tx.commit().map_err(from_rusqlite)?;
    Ok(Some(id))
}

/// Append `CLOSE_TXN` and clear the transaction from the capture context
pub fn close_transaction(conn: &Connection, actor: &str, transaction_id: &str) -> Result<i64> {
    let id = append_marker(conn, ChangeKind::CloseTxn, actor, Some(transaction_id), None)?;
    set_context(conn, actor, None)?;
    Ok(id)
}

/// Actor and transaction id stamped on trigger-written entries
pub fn set_context(conn: &Connection, actor: &str, transaction_id: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE audit_context SET actor = ?1, transaction_id = ?2 WHERE id = 1",
        rusqlite::params![actor, transaction_id],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}
