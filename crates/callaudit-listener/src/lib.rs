//! Asynchronous delivery of call events to the audit store.
//!
//! [`EventDispatcher`] is the production [`EventBus`]: publishing enqueues
//! the event and returns, and a fixed pool of worker tasks runs the
//! subscribed handlers. [`AuditEventListener`] is the handler that turns
//! each event into an audit row and writes it inside its own transaction,
//! retrying transient failures and never letting a failure escape.
//! [`AuditPipeline`] wires the two together.
//!
//! [`EventBus`]: callaudit_core::EventBus

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod pipeline;

pub use dispatcher::{DispatcherConfig, EventDispatcher};
pub use error::{AuditWriteFailure, DispatchError};
pub use listener::{AuditEventListener, ListenerConfig};
pub use pipeline::{AuditPipeline, PipelineConfig};

/// Default number of dispatcher workers.
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Default number of attempts for one audit write.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// Default pause between audit write attempts, in milliseconds.
pub const DEFAULT_WRITE_BACKOFF_MS: u64 = 1_000;
