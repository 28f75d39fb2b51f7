use thiserror::Error;

/// Errors that can occur within the deadline scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error. Callers should treat a failed
    /// scheduling call as a failed business operation — the schedule was
    /// not durably recorded.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A job row could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The deadline kind is not in the configured table for the requested
    /// scope. This is a caller bug and is never retried.
    #[error("Unknown deadline kind: {kind}")]
    UnknownDeadline { kind: String },

    /// Reported by a deadline or reminder handler when its body fails.
    /// Logged per invocation and never retried — jobs are one-shot.
    #[error("Handler failure: {0}")]
    Handler(String),

    /// A handler name did not resolve against the registry. At registry
    /// construction time this means a configured kind has no handler; at
    /// fire time it means persisted schedule state references a handler
    /// that is no longer deployed.
    #[error("Handler not registered: {name}")]
    HandlerNotFound { name: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
