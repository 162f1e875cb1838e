//! Field keys and event names shared by every driftx log line.
//!
//! `component`, `op` and `event` appear on every operation event; the rest
//! are attached where they apply.

pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";

pub const FIELD_REQUEST_ID: &str = "request_id";
pub const FIELD_TRACE_ID: &str = "trace_id";
pub const FIELD_TRANSACTION_ID: &str = "transaction_id";
pub const FIELD_ACTOR: &str = "actor";

pub const FIELD_TABLE: &str = "table";
pub const FIELD_MODULE: &str = "module";
pub const FIELD_ENTITY_ID: &str = "entity_id";

/// Executor round within one inner iteration
pub const FIELD_ROUND: &str = "round";
pub const FIELD_TO_CREATE: &str = "to_create";
pub const FIELD_TO_UPDATE: &str = "to_update";
pub const FIELD_TO_REPLACE: &str = "to_replace";
pub const FIELD_TO_DELETE: &str = "to_delete";

pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

/// Every field key, for collision checks
pub const ALL_FIELDS: [&str; 18] = [
    FIELD_COMPONENT,
    FIELD_OP,
    FIELD_EVENT,
    FIELD_DURATION_MS,
    FIELD_REQUEST_ID,
    FIELD_TRACE_ID,
    FIELD_TRANSACTION_ID,
    FIELD_ACTOR,
    FIELD_TABLE,
    FIELD_MODULE,
    FIELD_ENTITY_ID,
    FIELD_ROUND,
    FIELD_TO_CREATE,
    FIELD_TO_UPDATE,
    FIELD_TO_REPLACE,
    FIELD_TO_DELETE,
    FIELD_ERR_KIND,
    FIELD_ERR_CODE,
];
