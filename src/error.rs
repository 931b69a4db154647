//! Error types for the runtime.

use thiserror::Error;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A single field validation failure.
#[derive(Debug, Clone)]
pub struct FieldViolation {
    /// The field name (e.g. "max_size").
    pub field: String,
    /// The constraint that was violated (e.g. "must be > 0").
    pub constraint: String,
    /// The actual value that failed (as a string representation).
    pub actual: String,
}

impl FieldViolation {
    /// Create a new field violation.
    pub fn new(
        field: impl Into<String>,
        constraint: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            constraint: constraint.into(),
            actual: actual.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (got {})",
            self.field, self.constraint, self.actual
        )
    }
}

/// Comprehensive error type for runtime operations.
///
/// Every variant is reachable from [`Error::id`] by a stable, dotted
/// machine-readable identifier so callers can match on failure kind without
/// depending on `Display` text.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Two definitions in the registered tree share the same id.
    #[error("duplicate id '{id}' ({kind})")]
    DuplicateId {
        /// The clashing id.
        id: String,
        /// The definition kind (task, resource, event, ...).
        kind: String,
    },

    /// A definition lists the same tag id twice.
    #[error("duplicate tag '{tag_id}' on {kind} '{id}'")]
    DuplicateTag {
        /// The definition's own id.
        id: String,
        /// The definition kind.
        kind: String,
        /// The duplicated tag id.
        tag_id: String,
    },

    /// A write was attempted after the store was sealed.
    #[error("cannot modify store: already sealed")]
    LockableMapLocked,

    /// A non-optional dependency could not be resolved.
    #[error("missing dependency '{dependency_id}' required by '{consumer_id}'")]
    MissingDependency {
        /// The id that requested the dependency.
        consumer_id: String,
        /// The id that could not be found.
        dependency_id: String,
    },

    /// Circular dependency detected while building the resource init graph.
    #[error("circular dependency detected: {cycle}")]
    CircularDependency {
        /// The cycle, formatted as `a -> b -> a`.
        cycle: String,
    },

    /// Two tunnel resources claimed the same task id.
    #[error("task '{task_id}' is already tunneled by '{existing_tunnel}'")]
    DuplicateTunnel {
        /// The task id both tunnels targeted.
        task_id: String,
        /// The resource id that already owns the tunnel.
        existing_tunnel: String,
    },

    /// An override was registered for an id that was never registered in
    /// the first place.
    #[error("override target '{id}' was never registered")]
    OverrideTargetMissing {
        /// The id the override was aimed at.
        id: String,
    },

    /// An override's kind does not match the kind already registered
    /// under that id (e.g. overriding a task with a resource).
    #[error("override for '{id}' is a {override_kind}, but the registered definition is a {existing_kind}")]
    OverrideKindMismatch {
        /// The id being overridden.
        id: String,
        /// The kind already on record.
        existing_kind: String,
        /// The kind the override tried to apply.
        override_kind: String,
    },

    /// Resource initialization failed.
    #[error("initialization failed for resource '{resource_id}': {reason}")]
    Initialization {
        /// The resource identifier.
        resource_id: String,
        /// The failure reason.
        reason: String,
        /// The underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Resource disposal failed.
    #[error("dispose failed for resource '{resource_id}': {reason}")]
    Dispose {
        /// The resource identifier.
        resource_id: String,
        /// The failure reason.
        reason: String,
        /// The underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A resource, task, event, or hook id was not found in the sealed store.
    #[error("not found: {kind} '{id}'")]
    NotFound {
        /// The definition kind.
        kind: String,
        /// The id that was looked up.
        id: String,
    },

    /// Task input failed `input_schema` validation.
    #[error("task input validation failed for {task_id}: {reason}")]
    InputValidation {
        /// The task id.
        task_id: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Task result failed `result_schema` validation.
    #[error("task result validation failed for {task_id}: {reason}")]
    ResultValidation {
        /// The task id.
        task_id: String,
        /// Human-readable reason.
        reason: String,
    },

    /// One or more configuration fields failed validation.
    #[error("validation error: {violations:?}")]
    Validation {
        /// Individual field validation failures.
        violations: Vec<FieldViolation>,
    },

    /// A task's `run` raised an error not matching a declared error helper.
    #[error("task '{task_id}' failed: {message}")]
    TaskRun {
        /// The task id.
        task_id: String,
        /// The failure message.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// `async_context.require(...)` was called outside of a `provide` frame.
    #[error("async context '{context_id}' is required but was not provided")]
    MiddlewareContextRequired {
        /// The context id that was missing.
        context_id: String,
    },

    /// An event handler re-entered its own emission.
    #[error("cycle detected emitting event '{event_id}': {path}")]
    EventCycle {
        /// The event id that cycled.
        event_id: String,
        /// The re-entrancy path, formatted as `source1 -> source2 -> source1`.
        path: String,
    },

    /// `emit_with_result` was called on a `parallel: true` event.
    #[error("emit_with_result is unsupported for parallel event '{event_id}'")]
    ParallelEventReturnUnsupported {
        /// The event id.
        event_id: String,
    },

    /// One or more listeners failed during an `Aggregate`-mode emission.
    #[error("{failed} of {total} listeners failed for event '{event_id}'")]
    AggregatedEventFailure {
        /// The event id.
        event_id: String,
        /// Number of listeners that failed.
        failed: usize,
        /// Total listeners attempted.
        total: usize,
        /// The individual listener errors.
        #[source]
        source: Box<Error>,
    },

    /// Middleware-imposed timeout.
    #[error("operation timed out after {timeout_ms}ms for '{resource_id}'")]
    Timeout {
        /// The resource or task identifier.
        resource_id: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
        /// The operation that timed out.
        operation: String,
    },

    /// Generic internal error, not expected in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// The error message.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a validation error from a list of field violations.
    pub fn validation(violations: Vec<FieldViolation>) -> Self {
        Self::Validation { violations }
    }

    /// Stable, dotted machine-readable id for this error variant.
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Self::DuplicateId { .. } => "store.errors.duplicate_id",
            Self::DuplicateTag { .. } => "store.errors.duplicate_tag",
            Self::LockableMapLocked => "store.errors.locked_map_locked",
            Self::MissingDependency { .. } => "scheduler.errors.missing_dependency",
            Self::CircularDependency { .. } => "scheduler.errors.circular_dependency",
            Self::DuplicateTunnel { .. } => "scheduler.errors.duplicate_tunnel",
            Self::OverrideTargetMissing { .. } => "store.errors.override_target_missing",
            Self::OverrideKindMismatch { .. } => "store.errors.override_kind_mismatch",
            Self::Initialization { .. } => "resource.errors.initialization",
            Self::Dispose { .. } => "resource.errors.dispose",
            Self::NotFound { .. } => "store.errors.not_found",
            Self::InputValidation { .. } => "runner.errors.input_validation",
            Self::ResultValidation { .. } => "runner.errors.result_validation",
            Self::Validation { .. } => "runner.errors.validation",
            Self::TaskRun { .. } => "runner.errors.task_run",
            Self::MiddlewareContextRequired { .. } => "context.errors.required",
            Self::EventCycle { .. } => "events.errors.cycle",
            Self::ParallelEventReturnUnsupported { .. } => "events.errors.parallel_return",
            Self::AggregatedEventFailure { .. } => "events.errors.aggregated",
            Self::Timeout { .. } => "runner.errors.timeout",
            Self::Internal { .. } => "runtime.errors.internal",
        }
    }

    /// Whether a caller might reasonably retry the operation that produced
    /// this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
