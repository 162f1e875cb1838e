//! Correlation ids and the request context.
//!
//! Ids are UUIDv7 strings, so they sort by creation time in the audit log.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! correlation_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Wrap an id read back from storage
            pub fn from_string(s: String) -> Self {
                Self(s)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

correlation_id!(
    /// One engine call (begin, commit, install, ...)
    RequestId
);
correlation_id!(
    /// Caller-supplied trace spanning several requests
    TraceId
);
correlation_id!(
    /// Stamped on every audit entry written between `OPEN_TXN` and `CLOSE_TXN`
    TransactionId
);

/// Who is asking, and under which ids
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub trace_id: Option<TraceId>,
    /// Recorded as the audit `actor`; an empty actor falls back to the
    /// configured default
    pub actor: String,
}

impl RequestContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            trace_id: None,
            actor: actor.into(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("driftx")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn test_display_matches_inner_string() {
        let id = RequestId::new();
        assert_eq!(id.to_string(), id.as_str());
    }

    #[test]
    fn test_serializes_as_bare_string() {
        let id = TransactionId::from_string("txn-1".to_string());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"txn-1\"");
        let back: TransactionId = serde_json::from_str("\"txn-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_context_defaults_to_driftx_actor() {
        let trace = TraceId::new();
        let ctx = RequestContext::default().with_trace_id(trace.clone());
        assert_eq!(ctx.actor, "driftx");
        assert_eq!(ctx.trace_id, Some(trace));
        assert_eq!(RequestContext::new("alice").actor, "alice");
    }
}
