//! In-memory audit store.
//!
//! Honors the same contract as the PostgreSQL store: ids come from a
//! shared sequence at append time (so a rolled back scope leaves a gap),
//! rows become visible only on commit, and finders order by timestamp then
//! id. Used by tests and by the CLI's `--ephemeral` mode.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AuditStore, TransactionScope};
use crate::{
    error::Result,
    models::{AuditRecord, EventKind, NewAuditRecord, RequestId},
};

#[derive(Debug, Default)]
struct State {
    rows: Vec<AuditRecord>,
    next_id: i64,
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Audit store holding committed rows in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditStore {
    state: Arc<Mutex<State>>,
}

impl MemoryAuditStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every committed row, in commit order.
    pub fn all(&self) -> Vec<AuditRecord> {
        self.state.lock().rows.clone()
    }

    /// Number of committed rows.
    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    /// Whether no row has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, predicate: impl Fn(&AuditRecord) -> bool) -> Vec<AuditRecord> {
        let mut rows: Vec<AuditRecord> =
            self.state.lock().rows.iter().filter(|row| predicate(row)).cloned().collect();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        rows
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn begin_isolated(&self) -> Result<Box<dyn TransactionScope>> {
        Ok(Box::new(MemoryScope { state: self.state.clone(), staged: Vec::new() }))
    }

    async fn find_by_request_id(&self, request_id: &RequestId) -> Result<Vec<AuditRecord>> {
        Ok(self.select(|row| &row.request_id == request_id))
    }

    async fn find_by_event_kind(&self, kind: EventKind) -> Result<Vec<AuditRecord>> {
        Ok(self.select(|row| row.event_kind == kind))
    }

    async fn find_by_endpoint(&self, endpoint: &str) -> Result<Vec<AuditRecord>> {
        Ok(self.select(|row| row.endpoint == endpoint))
    }
}

struct MemoryScope {
    state: Arc<Mutex<State>>,
    staged: Vec<AuditRecord>,
}

#[async_trait]
impl TransactionScope for MemoryScope {
    async fn append(&mut self, record: &NewAuditRecord) -> Result<AuditRecord> {
        let id = self.state.lock().allocate_id();
        let row = AuditRecord::from_new(id, record.clone());
        self.staged.push(row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { state, staged } = *self;
        state.lock().rows.extend(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
