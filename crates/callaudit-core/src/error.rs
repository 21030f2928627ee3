//! Error types for audit storage operations.
//!
//! Storage failures are classified so the audit listener can tell a
//! transient "could not write" condition (worth another attempt) from a
//! permanent one, and from a commit whose outcome is unknown.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// SQLSTATE codes that indicate the write can be attempted again.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "53300", "57P01", "57P02", "57P03"];

/// Core error type for storage and model operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed permanently.
    #[error("Database error: {0}")]
    Database(String),

    /// Database could not be reached or the pool was exhausted.
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    /// Constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A stored row could not be decoded into a record.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Commit failed after the statement was sent; the row may or may not
    /// have been persisted.
    #[error("Commit outcome unknown: {0}")]
    CommitAmbiguous(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Returns whether the failed operation can safely be attempted again.
    ///
    /// Only failures that happened before anything was committed qualify.
    /// `CommitAmbiguous` is never transient: repeating it could duplicate a
    /// row that was in fact written.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested record not found".to_string()),
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed => Self::Unavailable(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err)
                if db_err.code().is_some_and(|code| TRANSIENT_SQLSTATES.contains(&&*code)) =>
            {
                Self::Unavailable(db_err.to_string())
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Decode(err.to_string())
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Renders a panic payload as text.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
