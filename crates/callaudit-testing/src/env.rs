//! Complete in-process audit environment.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use callaudit_client::{AuditedClient, RetryPolicy};
use callaudit_core::{AuditRecord, AuditStore, RequestId, TestClock};
use callaudit_listener::{AuditPipeline, DispatcherConfig, ListenerConfig, PipelineConfig};

use crate::{store::FaultyStore, transport::ScriptedTransport};

/// How long `settle` waits for the dispatcher to drain.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Audited client, dispatcher, listener and store wired together, with a
/// virtual clock so retry and write backoff take no real time.
pub struct TestEnv {
    /// Virtual clock shared by client and listener.
    pub clock: TestClock,
    /// Store the listener writes to.
    pub store: FaultyStore,
    /// Transport the client sends through.
    pub transport: Arc<ScriptedTransport>,
    /// Running pipeline.
    pub pipeline: AuditPipeline,
    /// Client under test.
    pub client: AuditedClient,
}

impl TestEnv {
    /// Environment with a three attempt, one second fixed retry policy.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring an environment.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::default()
    }

    /// Waits until every published event has been written or dropped.
    ///
    /// # Errors
    ///
    /// Fails if the dispatcher does not drain in time.
    pub async fn settle(&self) -> Result<()> {
        self.pipeline.flush(SETTLE_TIMEOUT).await.context("audit pipeline did not drain")
    }

    /// Committed rows for one call, in trail order.
    ///
    /// # Errors
    ///
    /// Fails if the store query fails.
    pub async fn rows_for(&self, request_id: &RequestId) -> Result<Vec<AuditRecord>> {
        Ok(self.store.find_by_request_id(request_id).await?)
    }

    /// Every committed row, in commit order.
    pub fn all_rows(&self) -> Vec<AuditRecord> {
        self.store.memory().all()
    }

    /// Drains and stops the pipeline.
    ///
    /// # Errors
    ///
    /// Fails if the dispatcher does not drain in time.
    pub async fn shutdown(&self) -> Result<()> {
        self.pipeline.shutdown(SETTLE_TIMEOUT).await.context("audit pipeline shutdown failed")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TestEnv`].
#[derive(Debug)]
pub struct TestEnvBuilder {
    retry_policy: Option<RetryPolicy>,
    audit_enabled: bool,
    workers: usize,
    write_attempts: u32,
    transport: Option<Arc<ScriptedTransport>>,
    store: Option<FaultyStore>,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            retry_policy: Some(RetryPolicy::fixed(3, Duration::from_secs(1))),
            audit_enabled: true,
            workers: 4,
            write_attempts: 3,
            transport: None,
            store: None,
        }
    }
}

impl TestEnvBuilder {
    /// Retry policy for the client.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Client without a retry policy: every failure is final.
    pub fn without_retries(mut self) -> Self {
        self.retry_policy = None;
        self
    }

    /// Enables or disables persistence.
    pub fn audit_enabled(mut self, enabled: bool) -> Self {
        self.audit_enabled = enabled;
        self
    }

    /// Dispatcher worker count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Attempts per audit write.
    pub fn write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts;
        self
    }

    /// Uses an existing transport.
    pub fn transport(mut self, transport: Arc<ScriptedTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses an existing store.
    pub fn store(mut self, store: FaultyStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Starts the pipeline and builds the client.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn build(self) -> TestEnv {
        let clock = TestClock::new();
        let store = self.store.unwrap_or_default();
        let transport = self.transport.unwrap_or_else(|| Arc::new(ScriptedTransport::new()));

        let config = PipelineConfig {
            enabled: self.audit_enabled,
            dispatcher: DispatcherConfig { workers: self.workers },
            listener: ListenerConfig {
                max_attempts: self.write_attempts,
                backoff: Duration::from_secs(1),
            },
        };
        let pipeline =
            AuditPipeline::start(Arc::new(store.clone()), config, Arc::new(clock.clone()));

        let mut client = AuditedClient::builder(transport.clone(), pipeline.bus())
            .clock(Arc::new(clock.clone()));
        if let Some(policy) = self.retry_policy {
            client = client.retry_policy(policy);
        }

        TestEnv { clock, store, transport, pipeline, client: client.build() }
    }
}
