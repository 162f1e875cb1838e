use crate::plan::CrupdePlan;
use driftx_core_types::{RequestId, TraceId};
use thiserror::Error;

/// Result type alias using DriftError
pub type Result<T> = std::result::Result<T, DriftError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code used for programmatic handling,
/// log assertions and responses rendered by an outer control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Structural/Validation
    InvalidInput,
    NotFound,
    AlreadyExists,
    CycleDetected,
    MissingDependency,
    DependentActive,

    // Reconciliation
    ForwardProgress,
    Driver,

    // Transactions
    Concurrency,
    NoOpenTransaction,
    Rollback,
    CommitFailed,

    // Audit log
    InvalidAuditEntry,

    // Integration/IO
    Io,
    Serialization,
    Persistence,
    Config,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
            ExErrorKind::CycleDetected => "ERR_CYCLE_DETECTED",
            ExErrorKind::MissingDependency => "ERR_MISSING_DEPENDENCY",
            ExErrorKind::DependentActive => "ERR_DEPENDENT_ACTIVE",
            ExErrorKind::ForwardProgress => "ERR_FORWARD_PROGRESS",
            ExErrorKind::Driver => "ERR_DRIVER",
            ExErrorKind::Concurrency => "ERR_CONCURRENCY",
            ExErrorKind::NoOpenTransaction => "ERR_NO_OPEN_TRANSACTION",
            ExErrorKind::Rollback => "ERR_ROLLBACK",
            ExErrorKind::CommitFailed => "ERR_COMMIT_FAILED",
            ExErrorKind::InvalidAuditEntry => "ERR_INVALID_AUDIT_ENTRY",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Config => "ERR_CONFIG",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries classification fields for programmatic handling and enough
/// context (table, entity identity, plan snapshot) to reproduce a failing
/// diff outside the engine.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    table: Option<String>,
    entity_id: Option<String>,
    module: Option<String>,
    request_id: Option<RequestId>,
    trace_id: Option<TraceId>,
    message: String,
    source: Option<Box<ExError>>,
    plan: Option<String>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            table: None,
            entity_id: None,
            module: None,
            request_id: None,
            trace_id: None,
            message: String::new(),
            source: None,
            plan: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add resource table context
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Add entity identity context
    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// Add module context
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Add request ID context
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Add trace ID context
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a JSON snapshot of the plan that was in flight
    pub fn with_plan(mut self, plan: &CrupdePlan) -> Self {
        self.plan = serde_json::to_string(plan).ok();
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the table context, if any
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Get the entity identity context, if any
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    /// Get the module context, if any
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// Get the request ID context, if any
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Get the trace ID context, if any
    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    /// Get the serialized plan snapshot, if any
    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(module) = &self.module {
            write!(f, " (module: {})", module)?;
        }
        if let Some(table) = &self.table {
            write!(f, " (table: {})", table)?;
        }
        if let Some(entity_id) = &self.entity_id {
            write!(f, " (entity_id: {})", entity_id)?;
        }
        if let Some(source) = &self.source {
            write!(f, "; caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Error raised by an external resource driver for one entity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("driver error on {table}{}: {message}", entity_suffix(.entity_id))]
pub struct DriverError {
    pub table: String,
    pub entity_id: Option<String>,
    pub message: String,
}

fn entity_suffix(entity_id: &Option<String>) -> String {
    entity_id
        .as_ref()
        .map(|id| format!(" [{}]", id))
        .unwrap_or_default()
}

impl DriverError {
    /// Create a driver error for a table
    pub fn new(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            entity_id: None,
            message: message.into(),
        }
    }

    /// Attach the identity of the entity the call was about
    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }
}

/// Raised by the lazy loader when a retry round fails as many actions as the one before
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no forward progress after {rounds} rounds; {} action(s) unresolved", remaining.len())]
pub struct ForwardProgressError {
    /// Labels of the actions that never succeeded
    pub remaining: Vec<String>,
    /// Error returned by each remaining action on the final round
    pub last_errors: Vec<DriverError>,
    pub rounds: usize,
}

/// Phase in which reconciliation stopped making progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallSource {
    /// The retrying executor saw two identical-size failing subsets
    Executor,
    /// The inner loop saw the same diff counts for too many iterations
    Diff,
    /// Every outer pass found the authoritative side changed again
    Passes,
}

impl std::fmt::Display for StallSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StallSource::Executor => write!(f, "executor"),
            StallSource::Diff => write!(f, "diff"),
            StallSource::Passes => write!(f, "passes"),
        }
    }
}

/// Failures collected by one commit attempt
///
/// Rollback failure is only ever reported next to the apply/sync failure that
/// triggered it.
#[derive(Debug, Clone, Default)]
pub struct CommitFailure {
    pub apply: Option<DriftError>,
    pub sync: Option<DriftError>,
    pub rollback: Option<DriftError>,
}

impl std::fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(e) = &self.apply {
            parts.push(format!("apply failed: {}", e));
        }
        if let Some(e) = &self.sync {
            parts.push(format!("sync failed: {}", e));
        }
        match &self.rollback {
            Some(e) => parts.push(format!("rollback failed: {}", e)),
            None => parts.push("rollback succeeded".to_string()),
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// Domain error taxonomy for driftx operations
#[derive(Error, Debug, Clone)]
pub enum DriftError {
    // ===== Module graph =====
    /// Dependency cycle among modules being installed together
    #[error("Dependency cycle detected among modules: {}", modules.join(" -> "))]
    CycleDetected { modules: Vec<String> },

    /// Module name is not registered
    #[error("Unknown module: {name}")]
    UnknownModule { name: String },

    /// Module (name, version) registered twice
    #[error("Module already registered: {name}@{version}")]
    DuplicateModule { name: String, version: String },

    /// A module depends on something that is neither registered nor installed
    #[error("Module {module} depends on missing module {dependency}")]
    MissingDependency { module: String, dependency: String },

    /// Uninstall refused because another active module still depends on it
    #[error("Module {module} is required by installed module {dependent}")]
    DependentModuleActive { module: String, dependent: String },

    /// Module not installed in this record store
    #[error("Module not installed: {name}")]
    ModuleNotInstalled { name: String },

    // ===== Reconciliation =====
    /// Reconciliation stopped converging
    #[error("Forward progress halted ({source_kind}) during {phase}: {detail}")]
    ForwardProgress {
        phase: String,
        source_kind: StallSource,
        detail: String,
        remaining: Vec<String>,
        last_errors: Vec<DriverError>,
        plan: Box<CrupdePlan>,
    },

    /// A driver call outside the retrying executor failed
    #[error(transparent)]
    Driver(#[from] DriverError),

    // ===== Transactions =====
    /// Another commit or transaction holds the record store
    #[error("Concurrency conflict: {reason}")]
    ConcurrencyConflict { reason: String },

    /// Rollback requested without an open transaction
    #[error("No open transaction")]
    NoOpenTransaction,

    /// Inverse statements could not be applied
    #[error("Rollback failed: {message}")]
    Rollback { message: String },

    /// Apply or sync failed; carries the rollback outcome alongside
    #[error("Commit failed: {0}")]
    CommitFailed(Box<CommitFailure>),

    // ===== Audit log =====
    /// An audit entry is missing the snapshot its change kind requires
    #[error("Invalid audit entry {entry_id}: {reason}")]
    InvalidAuditEntry { entry_id: i64, reason: String },

    // ===== Integration =====
    /// Record store failure
    #[error(transparent)]
    Store(#[from] ExError),

    /// Configuration could not be loaded
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Internal invariant broken
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DriftError {
    /// Get the canonical kind for this error
    pub fn kind(&self) -> ExErrorKind {
        match self {
            DriftError::CycleDetected { .. } => ExErrorKind::CycleDetected,
            DriftError::UnknownModule { .. } | DriftError::ModuleNotInstalled { .. } => {
                ExErrorKind::NotFound
            }
            DriftError::DuplicateModule { .. } => ExErrorKind::AlreadyExists,
            DriftError::MissingDependency { .. } => ExErrorKind::MissingDependency,
            DriftError::DependentModuleActive { .. } => ExErrorKind::DependentActive,
            DriftError::ForwardProgress { .. } => ExErrorKind::ForwardProgress,
            DriftError::Driver(_) => ExErrorKind::Driver,
            DriftError::ConcurrencyConflict { .. } => ExErrorKind::Concurrency,
            DriftError::NoOpenTransaction => ExErrorKind::NoOpenTransaction,
            DriftError::Rollback { .. } => ExErrorKind::Rollback,
            DriftError::CommitFailed(_) => ExErrorKind::CommitFailed,
            DriftError::InvalidAuditEntry { .. } => ExErrorKind::InvalidAuditEntry,
            DriftError::Store(e) => e.kind(),
            DriftError::Config { .. } => ExErrorKind::Config,
            DriftError::Serialization { .. } => ExErrorKind::Serialization,
            DriftError::Internal { .. } => ExErrorKind::Internal,
        }
    }

    /// The plan snapshot attached to a forward-progress failure
    pub fn stuck_plan(&self) -> Option<&CrupdePlan> {
        match self {
            DriftError::ForwardProgress { plan, .. } => Some(plan.as_ref()),
            _ => None,
        }
    }
}

/// Conversion from DriftError to ExError for logging and outer surfaces
impl From<DriftError> for ExError {
    fn from(err: DriftError) -> Self {
        let kind = err.kind();
        match err {
            DriftError::Store(e) => e,
            DriftError::CycleDetected { ref modules } => ExError::new(kind)
                .with_op("sort_modules")
                .with_message(err.to_string())
                .with_module(modules.first().cloned().unwrap_or_default()),
            DriftError::UnknownModule { ref name } | DriftError::ModuleNotInstalled { ref name } => {
                ExError::new(kind)
                    .with_module(name.clone())
                    .with_message(err.to_string())
            }
            DriftError::DuplicateModule { ref name, .. } => ExError::new(kind)
                .with_op("register_module")
                .with_module(name.clone())
                .with_message(err.to_string()),
            DriftError::MissingDependency { ref module, .. }
            | DriftError::DependentModuleActive { ref module, .. } => ExError::new(kind)
                .with_module(module.clone())
                .with_message(err.to_string()),
            DriftError::ForwardProgress {
                ref phase,
                ref plan,
                ..
            } => ExError::new(kind)
                .with_op(phase.clone())
                .with_message(err.to_string())
                .with_plan(plan),
            DriftError::Driver(ref d) => {
                let base = ExError::new(kind)
                    .with_table(d.table.clone())
                    .with_message(d.message.clone());
                match &d.entity_id {
                    Some(id) => base.with_entity_id(id.clone()),
                    None => base,
                }
            }
            DriftError::CommitFailed(ref failure) => {
                let base = ExError::new(kind)
                    .with_op("commit")
                    .with_message(err.to_string());
                match failure.apply.clone().or_else(|| failure.sync.clone()) {
                    Some(cause) => base.with_source(cause.into()),
                    None => base,
                }
            }
            DriftError::InvalidAuditEntry { entry_id, .. } => ExError::new(kind)
                .with_entity_id(entry_id.to_string())
                .with_message(err.to_string()),
            other => ExError::new(kind).with_message(other.to_string()),
        }
    }
}

/// Conversion from serde_json::Error to DriftError
impl From<serde_json::Error> for DriftError {
    fn from(err: serde_json::Error) -> Self {
        DriftError::Serialization {
            message: err.to_string(),
        }
    }
}
