//! Core types for the outbound call audit pipeline.
//!
//! Provides the call lifecycle events, the persisted audit record, the JSON
//! payload normalizer and the append-only audit store. Every other crate in
//! the workspace builds on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod normalize;
pub mod storage;
pub mod time;

pub use error::{panic_message, CoreError, Result};
pub use events::{
    CallEvent, CallEventKind, CallFailedEvent, CallInitiatedEvent, CallSucceededEvent, EventBus,
    EventHandler, MulticastEventHandler,
};
pub use models::{
    AuditRecord, CallRequest, CallResponse, ErrorCause, EventKind, HttpMethod, NewAuditRecord,
    RequestId,
};
pub use normalize::{normalize, Normalized};
pub use storage::{memory::MemoryAuditStore, postgres::PgAuditStore, AuditStore, TransactionScope};
pub use time::{Clock, RealClock, TestClock};
