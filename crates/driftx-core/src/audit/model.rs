//! Audit log entry types.
//!
//! Entries are immutable once written. Row-level entries come from the
//! store's change-capture triggers; bracket markers and error records are
//! appended by the transaction controller.

use crate::errors::DriftError;
use crate::model::Record;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of an audit log entry
///
/// The string forms are what the `change_kind` column stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    StartCommit,
    EndCommit,
    /// Dry-run commit start; never opens a replay window
    PreviewStartCommit,
    PreviewEndCommit,
    OpenTxn,
    CloseTxn,
    Error,
}

impl ChangeKind {
    pub const ROW_CHANGES: [ChangeKind; 3] =
        [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
            ChangeKind::StartCommit => "START_COMMIT",
            ChangeKind::EndCommit => "END_COMMIT",
            ChangeKind::PreviewStartCommit => "PREVIEW_START_COMMIT",
            ChangeKind::PreviewEndCommit => "PREVIEW_END_COMMIT",
            ChangeKind::OpenTxn => "OPEN_TXN",
            ChangeKind::CloseTxn => "CLOSE_TXN",
            ChangeKind::Error => "ERROR",
        }
    }

    /// INSERT, UPDATE or DELETE
    pub fn is_row_change(&self) -> bool {
        Self::ROW_CHANGES.contains(self)
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = DriftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            "START_COMMIT" => ChangeKind::StartCommit,
            "END_COMMIT" => ChangeKind::EndCommit,
            "PREVIEW_START_COMMIT" => ChangeKind::PreviewStartCommit,
            "PREVIEW_END_COMMIT" => ChangeKind::PreviewEndCommit,
            "OPEN_TXN" => ChangeKind::OpenTxn,
            "CLOSE_TXN" => ChangeKind::CloseTxn,
            "ERROR" => ChangeKind::Error,
            other => {
                return Err(DriftError::Serialization {
                    message: format!("unknown change kind: {}", other),
                })
            }
        })
    }
}

/// Before/after row snapshots, stored as `change_json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    /// Row before the change (UPDATE, DELETE)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Record>,
    /// Row after the change (INSERT, UPDATE)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Record>,
}

/// One row of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Auto-increment key; total order within one store
    pub id: i64,
    pub ts: String,
    pub actor: String,
    /// Empty for bracket markers
    pub table_name: Option<String>,
    pub change_kind: ChangeKind,
    pub change: ChangePayload,
    pub message: Option<String>,
    pub transaction_id: Option<String>,
}

impl AuditEntry {
    /// Snapshot that must be present for this entry's kind
    pub(crate) fn require<'a>(
        &self,
        snapshot: &'a Option<Record>,
        name: &str,
    ) -> Result<&'a Record, DriftError> {
        snapshot.as_ref().ok_or_else(|| DriftError::InvalidAuditEntry {
            entry_id: self.id,
            reason: format!("{} entry has no `{}` snapshot", self.change_kind, name),
        })
    }

    pub(crate) fn table(&self) -> Result<&str, DriftError> {
        self.table_name
            .as_deref()
            .ok_or_else(|| DriftError::InvalidAuditEntry {
                entry_id: self.id,
                reason: format!("{} entry has no table name", self.change_kind),
            })
    }
}
