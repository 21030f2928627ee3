//! Call lifecycle events and the publish/subscribe seam.
//!
//! The audited client publishes one `Initiated` event per logical call,
//! then one `Error` event per failed attempt and at most one `Success`.
//! Subscribers (the audit listener in production) receive them through an
//! `EventBus` on a task other than the publisher's.
//!
//! ```text
//!                 Initiated / Success / Error
//! ┌───────────────┐        publish()        ┌──────────────────┐
//! │ AuditedClient │ ──────────────────────▶ │ EventBus         │
//! │ (Producer)    │   (never waits)         │ (Dispatcher)     │
//! └───────────────┘                         └──────────────────┘
//!                                                    │ per kind
//!                                                    ▼
//!                                         ┌────────────────────┐
//!                                         │ EventHandler       │
//!                                         │ (AuditListener)    │
//!                                         └────────────────────┘
//! ```

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CallRequest, CallResponse, ErrorCause, RequestId};

/// Events emitted around an outbound call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallEvent {
    /// Call is about to be sent.
    Initiated(CallInitiatedEvent),

    /// Call returned a 2xx response.
    Success(CallSucceededEvent),

    /// An attempt failed.
    Error(CallFailedEvent),
}

/// Emitted once per logical call before the first attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInitiatedEvent {
    /// The request being sent.
    pub request: CallRequest,

    /// When the event was constructed.
    pub timestamp: DateTime<Utc>,
}

/// Emitted when an attempt succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSucceededEvent {
    /// The original request.
    pub request: CallRequest,

    /// Response returned by the endpoint.
    pub response: CallResponse,

    /// When the event was constructed.
    pub timestamp: DateTime<Utc>,
}

/// Emitted for every failed attempt, retries included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFailedEvent {
    /// The original request, unchanged across retries.
    pub request: CallRequest,

    /// What went wrong.
    pub error: ErrorCause,

    /// Zero-based index of the failed attempt.
    pub retry_count: u32,

    /// True for every attempt after the first.
    pub is_retry: bool,

    /// When the event was constructed.
    pub timestamp: DateTime<Utc>,
}

/// Discriminant used to subscribe to one event variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallEventKind {
    /// `CallEvent::Initiated`.
    Initiated,
    /// `CallEvent::Success`.
    Success,
    /// `CallEvent::Error`.
    Error,
}

impl CallEventKind {
    /// Every variant.
    pub const ALL: [Self; 3] = [Self::Initiated, Self::Success, Self::Error];
}

impl fmt::Display for CallEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiated => write!(f, "initiated"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl CallEvent {
    /// Builds an `Initiated` event.
    pub fn initiated(request: CallRequest, timestamp: DateTime<Utc>) -> Self {
        Self::Initiated(CallInitiatedEvent { request, timestamp })
    }

    /// Builds a `Success` event.
    pub fn success(request: CallRequest, response: CallResponse, timestamp: DateTime<Utc>) -> Self {
        Self::Success(CallSucceededEvent { request, response, timestamp })
    }

    /// Builds an `Error` event for the given zero-based attempt index.
    ///
    /// `is_retry` is derived from the index so the two can never disagree.
    pub fn error(
        request: CallRequest,
        error: ErrorCause,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let is_retry = retry_count > 0;
        Self::Error(CallFailedEvent { request, error, retry_count, is_retry, timestamp })
    }

    /// Variant discriminant.
    pub fn kind(&self) -> CallEventKind {
        match self {
            Self::Initiated(_) => CallEventKind::Initiated,
            Self::Success(_) => CallEventKind::Success,
            Self::Error(_) => CallEventKind::Error,
        }
    }

    /// Request carried by the event.
    pub fn request(&self) -> &CallRequest {
        match self {
            Self::Initiated(e) => &e.request,
            Self::Success(e) => &e.request,
            Self::Error(e) => &e.request,
        }
    }

    /// Correlation id of the call.
    pub fn request_id(&self) -> &RequestId {
        self.request().request_id()
    }

    /// Construction timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Initiated(e) => e.timestamp,
            Self::Success(e) => e.timestamp,
            Self::Error(e) => e.timestamp,
        }
    }
}

/// Trait for reacting to call events.
///
/// Handlers run off the publisher's call stack. A failing handler must log
/// and swallow its error; nothing it does may reach the code that made the
/// call.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + fmt::Debug {
    /// Handles one event.
    async fn handle_event(&self, event: CallEvent);
}

/// Publish/subscribe capability the audited client depends on.
pub trait EventBus: Send + Sync + fmt::Debug {
    /// Hands an event to the bus and returns immediately.
    ///
    /// Never blocks on, and never observes the outcome of, any handler.
    fn publish(&self, event: CallEvent);

    /// Registers a handler for one event variant.
    fn subscribe(&self, kind: CallEventKind, handler: Arc<dyn EventHandler>);
}

/// Forwards each event to every registered handler concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: CallEvent) {
        let futures = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move { handler.handle_event(event).await }
        });

        futures::future::join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::models::HttpMethod;

    #[derive(Debug, Default)]
    struct CountingHandler {
        seen: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, _event: CallEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request() -> CallRequest {
        CallRequest::new(HttpMethod::Post, "/orders", Some(r#"{"item":"x"}"#.to_string()))
    }

    #[test]
    fn error_event_derives_retry_flag_from_index() {
        let first = CallEvent::error(request(), ErrorCause::new("boom", None), 0, Utc::now());
        let second = CallEvent::error(request(), ErrorCause::new("boom", None), 2, Utc::now());

        let CallEvent::Error(first) = first else { panic!("expected error event") };
        let CallEvent::Error(second) = second else { panic!("expected error event") };
        assert!(!first.is_retry);
        assert!(second.is_retry);
        assert_eq!(second.retry_count, 2);
    }

    #[test]
    fn accessors_expose_shared_request() {
        let req = request();
        let at = Utc::now();
        let event = CallEvent::success(req.clone(), CallResponse::new("{}", 200), at);

        assert_eq!(event.kind(), CallEventKind::Success);
        assert_eq!(event.request_id(), req.request_id());
        assert_eq!(event.timestamp(), at);
    }

    #[tokio::test]
    async fn multicast_forwards_to_every_subscriber() {
        let first = Arc::new(CountingHandler::default());
        let second = Arc::new(CountingHandler::default());

        let mut multicast = MulticastEventHandler::new();
        multicast.add_subscriber(first.clone());
        multicast.add_subscriber(second.clone());
        assert_eq!(multicast.subscriber_count(), 2);

        multicast.handle_event(CallEvent::initiated(request(), Utc::now())).await;

        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn multicast_without_subscribers_is_a_no_op() {
        let multicast = MulticastEventHandler::new();
        assert!(multicast.is_empty());

        multicast.handle_event(CallEvent::initiated(request(), Utc::now())).await;
    }
}
