//! Audit event listener.
//!
//! Converts each call event into one audit row and writes it in a fresh
//! transaction scope from [`AuditStore::begin_isolated`]. Transient storage
//! failures are retried with a fixed pause; everything else is logged and
//! dropped. Nothing here can fail the call that produced the event.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use callaudit_core::{
    normalize, AuditRecord, AuditStore, CallEvent, Clock, CoreError, EventHandler, EventKind,
    NewAuditRecord, RealClock,
};
use tracing::{debug, error, warn};

use crate::{error::AuditWriteFailure, DEFAULT_WRITE_ATTEMPTS, DEFAULT_WRITE_BACKOFF_MS};

/// Write retry settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Attempts per audit row, the first one included.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_WRITE_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_WRITE_BACKOFF_MS),
        }
    }
}

/// Persists call events as audit rows.
#[derive(Debug, Clone)]
pub struct AuditEventListener {
    store: Arc<dyn AuditStore>,
    config: ListenerConfig,
    clock: Arc<dyn Clock>,
}

impl AuditEventListener {
    /// Creates a listener that sleeps on the real clock between attempts.
    pub fn new(store: Arc<dyn AuditStore>, config: ListenerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(RealClock::new()))
    }

    /// Creates a listener with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn AuditStore>,
        config: ListenerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, config, clock }
    }

    /// The store rows are written to.
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Writes the row for `event`.
    ///
    /// # Errors
    ///
    /// - `AuditWriteFailure::Exhausted` when every attempt hit a transient
    ///   failure.
    /// - `AuditWriteFailure::Ambiguous` when a commit's outcome is unknown.
    /// - `AuditWriteFailure::Rejected` for any other storage failure.
    pub async fn record(&self, event: &CallEvent) -> Result<AuditRecord, AuditWriteFailure> {
        let row = to_record(event);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.write_once(&row).await {
                Ok(saved) => return Ok(saved),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        request_id = %row.request_id,
                        event_kind = %row.event_kind,
                        attempt,
                        max_attempts,
                        error = %e,
                        "audit write failed, retrying"
                    );
                    self.clock.sleep(self.config.backoff).await;
                    attempt += 1;
                },
                Err(e) => return Err(AuditWriteFailure::classify(attempt, e)),
            }
        }
    }

    async fn write_once(&self, row: &NewAuditRecord) -> Result<AuditRecord, CoreError> {
        let mut scope = self.store.begin_isolated().await?;

        let saved = match scope.append(row).await {
            Ok(saved) => saved,
            Err(e) => {
                if let Err(rollback_error) = scope.rollback().await {
                    debug!(error = %rollback_error, "rollback after failed append also failed");
                }
                return Err(e);
            },
        };

        scope.commit().await?;
        Ok(saved)
    }
}

#[async_trait]
impl EventHandler for AuditEventListener {
    async fn handle_event(&self, event: CallEvent) {
        match self.record(&event).await {
            Ok(saved) => {
                debug!(
                    id = saved.id,
                    request_id = %saved.request_id,
                    event_kind = %saved.event_kind,
                    endpoint = %saved.endpoint,
                    "saved API call"
                );
            },
            Err(failure) => {
                error!(
                    request_id = %event.request_id(),
                    kind = %event.kind(),
                    endpoint = %event.request().endpoint(),
                    error = %failure,
                    "failed to save API call"
                );
            },
        }
    }
}

/// Builds the audit row for one event.
///
/// Every row carries the normalized request payload. Success rows add the
/// normalized response and status; error rows add the normalized error
/// message and the attempt index, and are `RETRY_ERROR` when the attempt
/// was a retry.
pub fn to_record(event: &CallEvent) -> NewAuditRecord {
    let request = event.request();
    let mut row = NewAuditRecord {
        event_kind: EventKind::Initiated,
        request_id: request.request_id().clone(),
        endpoint: request.endpoint().to_string(),
        payload: Some(normalize(request.payload())),
        response: None,
        status_code: None,
        error_message: None,
        timestamp: event.timestamp(),
        retry_count: 0,
        is_retry: false,
    };

    match event {
        CallEvent::Initiated(_) => {},
        CallEvent::Success(success) => {
            row.event_kind = EventKind::Success;
            row.response = Some(normalize(Some(success.response.data())));
            row.status_code = Some(i32::from(success.response.status_code()));
        },
        CallEvent::Error(failed) => {
            row.event_kind = EventKind::for_error(failed.is_retry);
            row.error_message = Some(normalize(Some(&failed.error.message)));
            row.retry_count = i32::try_from(failed.retry_count).unwrap_or(i32::MAX);
            row.is_retry = failed.is_retry;
        },
    }

    row
}
