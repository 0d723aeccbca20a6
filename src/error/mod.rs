use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Snapshot not found: {snapshot_id}")]
    SnapshotNotFound { snapshot_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised at the agent boundary.
///
/// These never escape an analysis run: the orchestrator converts them into
/// failed [`AgentResult`](crate::agents::AgentResult) values.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid input for {agent}: {reason}")]
    InvalidInput { agent: String, reason: String },

    #[error("Invalid output from {agent}: {reason}")]
    InvalidOutput { agent: String, reason: String },

    #[error("{agent} execution failed: {message}")]
    Execution { agent: String, message: String },

    #[error("{agent} task aborted: {message}")]
    Aborted { agent: String, message: String },

    #[error("LLM call failed: {0}")]
    Llm(#[from] LangbaseError),
}

/// Snapshot schema and identity errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Invalid snapshot id: {snapshot_id}")]
    InvalidSnapshotId { snapshot_id: String },

    #[error("Unknown analysis type: {value}")]
    UnknownAnalysisType { value: String },

    #[error("Snapshot payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Cannot read legacy snapshot directory {path}: {message}")]
    LegacyDirectory { path: String, message: String },
}

/// A single field that could not be pulled out of an analysis payload.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("Missing field: {path}")]
    Missing { path: String },

    #[error("Malformed field {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Failures while deriving a comparison between two snapshots.
#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("Non-finite {field} for topic {topic}")]
    NonFinite { topic: String, field: String },

    #[error("Volume overflow for topic {topic}")]
    Overflow { topic: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for agent boundary checks
pub type AgentOutcome<T> = Result<T, AgentError>;

/// Result type alias for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;
