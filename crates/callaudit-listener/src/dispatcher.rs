//! Sharded event dispatcher.
//!
//! Publishing pushes the event onto an unbounded per-worker queue and
//! returns without waiting. The worker is chosen by hashing the event's
//! request id, so every event of one logical call is handled by the same
//! worker in publication order: `Initiated` before any `Success`/`Error`,
//! and errors in increasing attempt order. Events of different calls are
//! handled concurrently in no particular order.
//!
//! Handlers run under `catch_unwind`; a panicking handler is logged and the
//! worker carries on with the next event.

use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use callaudit_core::{
    panic_message, CallEvent, CallEventKind, EventBus, EventHandler, MulticastEventHandler,
    RequestId,
};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{mpsc, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{error::DispatchError, DEFAULT_WORKER_COUNT};

/// Dispatcher sizing.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker tasks; each owns one queue.
    pub workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { workers: DEFAULT_WORKER_COUNT }
    }
}

type Subscribers = Arc<RwLock<HashMap<CallEventKind, MulticastEventHandler>>>;

/// Counts events published but not yet handled.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn exit(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn pending(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Worker-pool implementation of [`EventBus`].
#[derive(Debug)]
pub struct EventDispatcher {
    queues: RwLock<Option<Vec<mpsc::UnboundedSender<CallEvent>>>>,
    subscribers: Subscribers,
    in_flight: Arc<InFlight>,
    cancellation_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Spawns the worker pool on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(config: DispatcherConfig) -> Self {
        let workers = config.workers.max(1);
        let subscribers: Subscribers = Arc::default();
        let in_flight = Arc::new(InFlight::default());
        let cancellation_token = CancellationToken::new();

        let mut queues = Vec::with_capacity(workers);
        let mut worker_handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.push(tx);

            let worker = Worker {
                worker_id,
                queue: rx,
                subscribers: subscribers.clone(),
                in_flight: in_flight.clone(),
                cancellation_token: cancellation_token.clone(),
            };
            worker_handles.push(tokio::spawn(worker.run()));
        }

        info!(workers, "event dispatcher started");

        Self {
            queues: RwLock::new(Some(queues)),
            subscribers,
            in_flight,
            cancellation_token,
            worker_handles: Mutex::new(worker_handles),
        }
    }

    /// Number of events published but not yet handled.
    pub fn pending(&self) -> usize {
        self.in_flight.pending()
    }

    /// Number of handlers subscribed to `kind`.
    pub fn subscriber_count(&self, kind: CallEventKind) -> usize {
        self.subscribers.read().get(&kind).map_or(0, MulticastEventHandler::subscriber_count)
    }

    /// Whether the dispatcher still accepts events.
    pub fn is_running(&self) -> bool {
        self.queues.read().is_some()
    }

    /// Waits until every published event has been handled.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::IdleTimeout` if events are still pending when
    /// `timeout` elapses.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), DispatchError> {
        tokio::time::timeout(timeout, self.in_flight.wait_idle())
            .await
            .map_err(|_| DispatchError::IdleTimeout { timeout, pending: self.pending() })
    }

    /// Stops accepting events, lets workers drain their queues, and joins
    /// them.
    ///
    /// Events published after this call are logged and dropped. If the
    /// workers do not finish within `timeout` they are told to stop after
    /// their current event.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ShutdownTimeout` when the drain does not
    /// complete in time.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), DispatchError> {
        let Some(queues) = self.queues.write().take() else {
            debug!("event dispatcher already shut down");
            return Ok(());
        };
        drop(queues);

        let handles = std::mem::take(&mut *self.worker_handles.lock());
        info!(
            workers = handles.len(),
            pending = self.pending(),
            timeout_ms = timeout.as_millis(),
            "shutting down event dispatcher"
        );

        let join_all = async {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(
                        worker_id,
                        error = %join_error,
                        "dispatcher worker terminated abnormally"
                    );
                }
            }
        };

        if tokio::time::timeout(timeout, join_all).await.is_err() {
            self.cancellation_token.cancel();
            error!(
                timeout_ms = timeout.as_millis(),
                pending = self.pending(),
                "dispatcher shutdown timed out, remaining events will not be handled"
            );
            return Err(DispatchError::ShutdownTimeout { timeout });
        }

        info!("event dispatcher stopped");
        Ok(())
    }

    fn shard_for(request_id: &RequestId, shards: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        request_id.hash(&mut hasher);
        usize::try_from(hasher.finish() % shards as u64).unwrap_or(0)
    }
}

impl EventBus for EventDispatcher {
    fn publish(&self, event: CallEvent) {
        let queues = self.queues.read();
        let Some(queues) = queues.as_ref() else {
            warn!(
                request_id = %event.request_id(),
                kind = %event.kind(),
                "event published after dispatcher shutdown, dropping"
            );
            return;
        };

        let shard = Self::shard_for(event.request_id(), queues.len());
        self.in_flight.enter();
        if let Err(mpsc::error::SendError(event)) = queues[shard].send(event) {
            self.in_flight.exit();
            warn!(
                request_id = %event.request_id(),
                shard,
                "dispatcher worker is gone, dropping event"
            );
        }
    }

    fn subscribe(&self, kind: CallEventKind, handler: Arc<dyn EventHandler>) {
        let mut subscribers = self.subscribers.write();
        subscribers.entry(kind).or_default().add_subscriber(handler);
        debug!(%kind, "handler subscribed");
    }
}

struct Worker {
    worker_id: usize,
    queue: mpsc::UnboundedReceiver<CallEvent>,
    subscribers: Subscribers,
    in_flight: Arc<InFlight>,
    cancellation_token: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker_id = self.worker_id, "dispatcher worker starting");

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => {
                    self.discard_queued();
                    break;
                },
                event = self.queue.recv() => event,
            };
            let Some(event) = event else { break };

            self.dispatch(event).await;
            self.in_flight.exit();
        }

        debug!(worker_id = self.worker_id, "dispatcher worker stopped");
    }

    /// Drops everything still queued so the in-flight count reaches zero.
    fn discard_queued(&mut self) {
        self.queue.close();
        let mut dropped = 0_usize;
        while let Ok(event) = self.queue.try_recv() {
            debug!(request_id = %event.request_id(), kind = %event.kind(), "discarding event");
            self.in_flight.exit();
            dropped += 1;
        }
        if dropped > 0 {
            warn!(
                worker_id = self.worker_id,
                dropped,
                "dispatcher worker cancelled with events queued"
            );
        }
    }

    async fn dispatch(&self, event: CallEvent) {
        let handler = self.subscribers.read().get(&event.kind()).cloned();
        let Some(handler) = handler else {
            return;
        };

        let request_id = event.request_id().clone();
        let kind = event.kind();
        if let Err(payload) = AssertUnwindSafe(handler.handle_event(event)).catch_unwind().await {
            let message = panic_message(payload.as_ref());
            error!(
                worker_id = self.worker_id,
                request_id = %request_id,
                %kind,
                panic = %message,
                "event handler panicked"
            );
        }
    }
}
