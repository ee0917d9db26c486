//! Error types for Invoice Scan.
//!
//! Malformed *input data* (AI output, email content) is never an error —
//! every such path is a typed result. The enums here cover infrastructure
//! failures: the AI backend transport, the store, and misuse of the
//! persistence boundary.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Store-related errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// AI extraction backend errors (transport level).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid backend response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Backend request timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// No JSON object could be recovered from a backend response.
///
/// Always non-fatal to the overall scan; the excerpt is kept for
/// diagnosis in logs.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no JSON object recovered from backend response (excerpt: {raw_excerpt:?})")]
pub struct NormalizationError {
    /// First 500 characters of the raw response text.
    pub raw_excerpt: String,
}

/// Persistence boundary errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Candidate is not savable: {0}")]
    NotSavable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Pipeline-level errors (email source plumbing, per-email infrastructure
/// failures surfaced to the batch caller).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Email source fetch failed: {0}")]
    SourceFetch(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
