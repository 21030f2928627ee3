//! Audit store with injectable faults.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use async_trait::async_trait;
use callaudit_core::{
    AuditRecord, AuditStore, CoreError, EventKind, MemoryAuditStore, NewAuditRecord, RequestId,
    Result, TransactionScope,
};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Faults {
    outage: bool,
    failing_begins: u32,
    failing_appends: u32,
    ambiguous_commits: u32,
    slow_commit: Option<std::time::Duration>,
}

/// Wraps a [`MemoryAuditStore`] and fails on request.
///
/// - An outage fails every `begin_isolated` until lifted.
/// - Counted begin and append faults fail the next N calls with
///   `CoreError::Unavailable`.
/// - An ambiguous commit persists the rows and then reports
///   `CoreError::CommitAmbiguous`, like a commit whose acknowledgement was
///   lost.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    inner: MemoryAuditStore,
    faults: Arc<Mutex<Faults>>,
    begins: Arc<AtomicU32>,
    commits: Arc<AtomicU32>,
}

impl FaultyStore {
    /// Creates a healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows, bypassing any fault.
    pub fn memory(&self) -> &MemoryAuditStore {
        &self.inner
    }

    /// Starts or lifts a full outage.
    pub fn set_outage(&self, outage: bool) {
        self.faults.lock().outage = outage;
    }

    /// Fails the next `count` begin calls.
    pub fn fail_next_begins(&self, count: u32) {
        self.faults.lock().failing_begins = count;
    }

    /// Fails the next `count` appends.
    pub fn fail_next_appends(&self, count: u32) {
        self.faults.lock().failing_appends = count;
    }

    /// Makes the next `count` commits ambiguous.
    pub fn ambiguous_next_commits(&self, count: u32) {
        self.faults.lock().ambiguous_commits = count;
    }

    /// Delays every commit by `delay` (real time).
    pub fn set_commit_delay(&self, delay: std::time::Duration) {
        self.faults.lock().slow_commit = Some(delay);
    }

    /// Number of `begin_isolated` calls, failed ones included.
    pub fn begin_count(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }

    /// Number of commit calls, failed ones included.
    pub fn commit_count(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }
}

fn take(counter: &mut u32) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

#[async_trait]
impl AuditStore for FaultyStore {
    async fn begin_isolated(&self) -> Result<Box<dyn TransactionScope>> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = self.faults.lock();
            if faults.outage {
                return Err(CoreError::Unavailable("injected outage".into()));
            }
            if take(&mut faults.failing_begins) {
                return Err(CoreError::Unavailable("injected begin failure".into()));
            }
        }

        let scope = self.inner.begin_isolated().await?;
        Ok(Box::new(FaultyScope {
            scope,
            faults: self.faults.clone(),
            commits: self.commits.clone(),
        }))
    }

    async fn find_by_request_id(&self, request_id: &RequestId) -> Result<Vec<AuditRecord>> {
        self.inner.find_by_request_id(request_id).await
    }

    async fn find_by_event_kind(&self, kind: EventKind) -> Result<Vec<AuditRecord>> {
        self.inner.find_by_event_kind(kind).await
    }

    async fn find_by_endpoint(&self, endpoint: &str) -> Result<Vec<AuditRecord>> {
        self.inner.find_by_endpoint(endpoint).await
    }
}

struct FaultyScope {
    scope: Box<dyn TransactionScope>,
    faults: Arc<Mutex<Faults>>,
    commits: Arc<AtomicU32>,
}

#[async_trait]
impl TransactionScope for FaultyScope {
    async fn append(&mut self, record: &NewAuditRecord) -> Result<AuditRecord> {
        if take(&mut self.faults.lock().failing_appends) {
            return Err(CoreError::Unavailable("injected append failure".into()));
        }
        self.scope.append(record).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let (ambiguous, delay) = {
            let mut faults = self.faults.lock();
            (take(&mut faults.ambiguous_commits), faults.slow_commit)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.scope.commit().await?;
        if ambiguous {
            return Err(CoreError::CommitAmbiguous("injected lost acknowledgement".into()));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.scope.rollback().await
    }
}
