//! Error types for the judging engine.
//!
//! Defines error types for each subsystem:
//! - Resource limit parsing
//! - Docker sandbox operations
//! - Persistence (problems, submissions, summaries)
//! - Submission orchestration

use thiserror::Error;

/// Errors produced while translating human-readable resource limits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("Invalid limit format '{value}': {reason}")]
    InvalidLimitFormat { value: String, reason: String },
}

impl LimitError {
    pub(crate) fn invalid(value: &str, reason: impl Into<String>) -> Self {
        LimitError::InvalidLimitFormat {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Failed to pull image '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    #[error("Docker build failed: {0}")]
    BuildFailed(String),

    #[error("Docker run failed: {0}")]
    RunFailed(String),

    #[error("Container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("Failed to read container output: {0}")]
    OutputFailed(String),

    #[error("Failed to assemble build context: {0}")]
    Context(String),

    #[error("Cleanup failed for '{target}': {reason}")]
    CleanupFailed { target: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record in '{table}': {reason}")]
    Corrupt { table: String, reason: String },

    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Errors surfaced by the submission orchestrator.
///
/// Expected grading outcomes (wrong answer, timeouts, memory, sandbox
/// trouble) are verdicts, not errors. Only conditions a caller must fix
/// or that make grading impossible end up here.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error(transparent)]
    InvalidLimit(#[from] LimitError),

    #[error("Problem '{0}' not found")]
    ProblemNotFound(String),

    #[error("Problem '{0}' has no test cases")]
    NoTestCases(String),

    #[error("Invalid state transition from '{from}' on '{event}'")]
    InvalidTransition { from: String, event: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Summary for user '{user_id}' on problem '{problem_id}' still contended after {attempts} attempts")]
    SummaryContention {
        user_id: String,
        problem_id: String,
        attempts: u32,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
