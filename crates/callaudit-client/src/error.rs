//! Error types for audited calls.
//!
//! `TransportError` describes one failed attempt and is what the retry
//! policy classifies. `ClientError` is what the caller finally sees; every
//! variant raised after a request exists carries its request id so the
//! failure can be joined with the audit trail.

use std::fmt;

use callaudit_core::{ErrorCause, RequestId};
use thiserror::Error;

/// Result type alias for audited calls.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Failure of a single transport attempt.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection could not be established or was lost.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// No response within the read timeout.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout that was exceeded
        timeout_ms: u64,
    },

    /// Endpoint answered with a non-2xx status.
    #[error("HTTP {status_code}: {body}")]
    Status {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Request could not be built, e.g. a relative endpoint without a base URL.
    #[error("invalid request configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Transport panicked while handling the request.
    #[error("transport panicked: {message}")]
    Internal {
        /// Panic payload rendered as text
        message: String,
    },
}

impl TransportError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates an error for a non-2xx response.
    pub fn status(status_code: u16, body: impl Into<String>) -> Self {
        Self::Status { status_code, body: body.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Network failures, timeouts, 5xx and 429 are retryable. Other 4xx
    /// responses, configuration problems and transport panics are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status_code, .. } => *status_code >= 500 || *status_code == 429,
            Self::Configuration { .. } | Self::Internal { .. } => false,
        }
    }

    /// Coarse category for the failure.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }

    /// Converts the failure into the cause carried by an error event.
    pub fn to_cause(&self) -> ErrorCause {
        ErrorCause::new(self.to_string(), Some(self.category().to_string()))
    }
}

/// Category of a transport failure, recorded as the event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connectivity problems.
    Network,
    /// Read timeout.
    Timeout,
    /// HTTP 4xx other than 429.
    Client,
    /// HTTP 5xx.
    Server,
    /// HTTP 429.
    RateLimit,
    /// Request could not be built.
    Configuration,
    /// Transport panic.
    Internal,
}

impl From<&TransportError> for ErrorCategory {
    fn from(error: &TransportError) -> Self {
        match error {
            TransportError::Network { .. } => Self::Network,
            TransportError::Timeout { .. } => Self::Timeout,
            TransportError::Status { status_code: 429, .. } => Self::RateLimit,
            TransportError::Status { status_code, .. } if *status_code >= 500 => Self::Server,
            TransportError::Status { .. } => Self::Client,
            TransportError::Configuration { .. } => Self::Configuration,
            TransportError::Internal { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Error returned to the code that made the call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request body could not be serialized. Raised before any event.
    #[error("failed to serialize request body: {source}")]
    Serialization {
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Response body could not be deserialized into the requested type.
    ///
    /// The call itself succeeded and its `Success` event was published.
    #[error("failed to deserialize response for request {request_id}: {source}")]
    Deserialization {
        /// Correlation id of the call
        request_id: RequestId,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Attempt failed and was not retried.
    #[error("call {request_id} failed: {source}")]
    Transport {
        /// Correlation id of the call
        request_id: RequestId,
        /// The failed attempt
        #[source]
        source: TransportError,
    },

    /// Every attempt allowed by the retry policy failed.
    #[error("call {request_id} failed after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Correlation id of the call
        request_id: RequestId,
        /// Number of attempts made
        attempts: u32,
        /// Failure of the final attempt
        #[source]
        last: TransportError,
    },

    /// Detached call was cancelled before it finished.
    #[error("call {request_id} was cancelled")]
    Cancelled {
        /// Correlation id of the call
        request_id: RequestId,
    },

    /// Detached call's task panicked outside the transport.
    #[error("call {request_id} panicked: {message}")]
    Panicked {
        /// Correlation id of the call
        request_id: RequestId,
        /// Panic payload rendered as text
        message: String,
    },
}

impl ClientError {
    /// Correlation id of the failed call, if a request had been built.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Serialization { .. } => None,
            Self::Deserialization { request_id, .. }
            | Self::Transport { request_id, .. }
            | Self::RetryExhausted { request_id, .. }
            | Self::Cancelled { request_id }
            | Self::Panicked { request_id, .. } => Some(request_id),
        }
    }

    /// The last transport failure, for transport and exhaustion errors.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport { source, .. } => Some(source),
            Self::RetryExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}
