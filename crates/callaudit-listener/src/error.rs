//! Error types for the audit listener and dispatcher.

use std::time::Duration;

use callaudit_core::CoreError;
use thiserror::Error;

/// Why an audit row could not be written.
///
/// Produced only inside the listener. It is logged and dropped there; the
/// code that made the call never sees it.
#[derive(Debug, Error)]
pub enum AuditWriteFailure {
    /// Every attempt hit a transient failure.
    #[error("audit write failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Failure of the final attempt
        #[source]
        last: CoreError,
    },

    /// Commit was sent but its outcome is unknown. Not retried, so the row
    /// is either stored once or lost, never duplicated.
    #[error("audit write outcome unknown: {source}")]
    Ambiguous {
        /// Underlying commit failure
        #[source]
        source: CoreError,
    },

    /// The store rejected the row for a reason another attempt cannot fix.
    #[error("audit write rejected: {source}")]
    Rejected {
        /// Underlying storage failure
        #[source]
        source: CoreError,
    },
}

impl AuditWriteFailure {
    /// Classifies a storage failure from the final permitted attempt.
    pub fn classify(attempts: u32, error: CoreError) -> Self {
        match error {
            CoreError::CommitAmbiguous(_) => Self::Ambiguous { source: error },
            e if e.is_transient() => Self::Exhausted { attempts, last: e },
            e => Self::Rejected { source: e },
        }
    }
}

/// Errors from dispatcher lifecycle operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Queued events were still being handled when the wait ended.
    #[error("{pending} events still pending after {timeout:?}")]
    IdleTimeout {
        /// How long we waited
        timeout: Duration,
        /// Events not yet handled
        pending: usize,
    },

    /// Workers did not drain their queues in time.
    #[error("dispatcher shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// How long we waited
        timeout: Duration,
    },
}
