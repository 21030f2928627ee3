//! Append-only audit record storage.
//!
//! The audit listener is the only writer and it always writes through a
//! fresh [`TransactionScope`] obtained from [`AuditStore::begin_isolated`],
//! never through a transaction owned by the code that made the call. Reads
//! are limited to the three lookups below; rows are never updated or
//! deleted.
//!
//! Two implementations ship: [`postgres::PgAuditStore`] for production and
//! [`memory::MemoryAuditStore`] for tests and ephemeral CLI runs.

use std::fmt;

use async_trait::async_trait;

pub mod memory;
pub mod postgres;

use crate::{
    error::Result,
    models::{AuditRecord, EventKind, NewAuditRecord, RequestId},
};

/// Persistence capability for audit rows.
///
/// All finders return rows ordered by timestamp ascending, ties broken by
/// id ascending.
#[async_trait]
pub trait AuditStore: Send + Sync + fmt::Debug {
    /// Opens a new transaction scope independent of any other.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Unavailable` when the store cannot be reached.
    async fn begin_isolated(&self) -> Result<Box<dyn TransactionScope>>;

    /// All rows for one logical call.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    async fn find_by_request_id(&self, request_id: &RequestId) -> Result<Vec<AuditRecord>>;

    /// All rows of one kind.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    async fn find_by_event_kind(&self, kind: EventKind) -> Result<Vec<AuditRecord>>;

    /// All rows targeting one endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    async fn find_by_endpoint(&self, endpoint: &str) -> Result<Vec<AuditRecord>>;
}

/// A single isolated write scope.
///
/// Dropping a scope without committing discards everything appended to it.
#[async_trait]
pub trait TransactionScope: Send {
    /// Stages a row and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    async fn append(&mut self, record: &NewAuditRecord) -> Result<AuditRecord>;

    /// Makes staged rows durable.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::CommitAmbiguous` if the commit was sent but its
    /// outcome is unknown.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards staged rows.
    ///
    /// # Errors
    ///
    /// Returns error if the rollback cannot be delivered; the scope is
    /// discarded either way.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
