//! Error types for the tax conversation orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Turn Errors
    // =============================

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("State persistence error: {0}")]
    State(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Oracle timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by domain services (calculation, office system, OCR).
///
/// Handlers match on these and turn them into `workflow_status = error`
/// updates; they never escape a handler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}
