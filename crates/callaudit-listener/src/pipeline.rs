//! Dispatcher and listener wired together.

use std::{sync::Arc, time::Duration};

use callaudit_core::{AuditStore, CallEventKind, Clock, EventBus};
use tracing::info;

use crate::{
    dispatcher::{DispatcherConfig, EventDispatcher},
    error::DispatchError,
    listener::{AuditEventListener, ListenerConfig},
};

/// Settings for the whole audit pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// When false the dispatcher runs with no audit subscriber, so events
    /// are accepted and discarded.
    pub enabled: bool,
    /// Worker pool sizing.
    pub dispatcher: DispatcherConfig,
    /// Audit write retries.
    pub listener: ListenerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dispatcher: DispatcherConfig::default(),
            listener: ListenerConfig::default(),
        }
    }
}

/// Running audit pipeline: an [`EventDispatcher`] with an
/// [`AuditEventListener`] subscribed to every call event.
#[derive(Debug, Clone)]
pub struct AuditPipeline {
    dispatcher: Arc<EventDispatcher>,
    enabled: bool,
}

impl AuditPipeline {
    /// Starts the dispatcher and subscribes the listener.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(
        store: Arc<dyn AuditStore>,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher = Arc::new(EventDispatcher::start(config.dispatcher));

        if config.enabled {
            let listener = Arc::new(AuditEventListener::with_clock(store, config.listener, clock));
            for kind in CallEventKind::ALL {
                dispatcher.subscribe(kind, listener.clone());
            }
            info!("audit pipeline started");
        } else {
            info!("audit pipeline disabled, call events will not be persisted");
        }

        Self { dispatcher, enabled: config.enabled }
    }

    /// Bus to hand to the audited client.
    pub fn bus(&self) -> Arc<dyn EventBus> {
        self.dispatcher.clone()
    }

    /// The underlying dispatcher.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Whether events are persisted.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Waits until every published event has been handled.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::IdleTimeout` if the wait exceeds `timeout`.
    pub async fn flush(&self, timeout: Duration) -> Result<(), DispatchError> {
        self.dispatcher.wait_idle(timeout).await
    }

    /// Drains pending events and stops the workers.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ShutdownTimeout` if draining exceeds `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), DispatchError> {
        self.dispatcher.shutdown(timeout).await
    }
}
