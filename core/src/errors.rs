//! Error types for Graphmine core operations

use thiserror::Error;

/// Main error type for Graphmine core operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Graph storage error: {0}")]
    Storage(#[from] GraphError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] LlmError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-job failure taxonomy; drives retry decisions and debug output
#[derive(Error, Debug)]
pub enum JobError {
    /// No provider, no schemas after auto-install, or similar setup problems
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid source type or missing source content
    #[error("Input error: {0}")]
    Input(String),

    /// The rate limiter refused capacity within the bounded wait
    #[error("Rate limited: no token budget granted within {waited_ms}ms")]
    RateLimited { waited_ms: u64 },

    /// Every LLM call in the job failed
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Missing organization or project context
    #[error("Tenant error: {0}")]
    Tenant(String),

    /// A graph operation outside the per-entity catch failed
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// A job store operation failed mid-pipeline
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

impl JobError {
    /// Whether a failed job should be offered another attempt.
    /// Rate-limited and LLM failures are transient; config, input, and
    /// tenant failures would fail identically on retry.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            JobError::RateLimited { .. } | JobError::Llm(_) | JobError::Graph(_) | JobError::Store(_)
        )
    }

    /// Short kind tag recorded in timelines and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Config(_) => "config",
            JobError::Input(_) => "input",
            JobError::RateLimited { .. } => "rate-limited",
            JobError::Llm(_) => "llm",
            JobError::Tenant(_) => "tenant",
            JobError::Graph(_) => "persistence",
            JobError::Store(_) => "store",
        }
    }
}

/// Errors related to graph storage operations
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Duplicate relationship: {0}")]
    DuplicateRelationship(String),

    #[error("Constraint violation ({code}): {message}")]
    ConstraintViolation { code: String, message: String },

    #[error("Tenant isolation violation: {0}")]
    TenantIsolationViolation(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Errors related to the durable job queue
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Errors related to LLM provider operations
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error from LLM provider: {0}")]
    ApiError(String),

    #[error("Timeout during LLM call")]
    Timeout,

    #[error("Failed to parse LLM response: {0}")]
    ResponseParseError(String),

    #[error("LLM response failed schema validation: {0}")]
    SchemaValidationError(String),

    #[error("All {failed_calls} LLM call(s) failed: {message}")]
    AllCallsFailed { message: String, failed_calls: usize },

    #[error("Internal provider error: {0}")]
    InternalError(String),
}

/// Errors from auxiliary extraction services (verifier, embeddings, chunker).
/// These are non-fatal in the pipeline and only surface as warnings.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Service call failed: {0}")]
    CallFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for job store operations
pub type StoreResult<T> = Result<T, StoreError>;
