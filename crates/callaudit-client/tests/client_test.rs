//! Audited client against a real HTTP server.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use callaudit_client::{
    AuditedClient, ClientConfig, ClientError, ReqwestTransport, RetryPolicy, TransportError,
};
use callaudit_core::{CallEvent, CallEventKind, EventBus, EventHandler, HttpMethod, TestClock};
use callaudit_testing::ScriptedTransport;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

#[derive(Debug, Default)]
struct RecordingBus {
    events: Mutex<Vec<CallEvent>>,
}

impl RecordingBus {
    fn events(&self) -> Vec<CallEvent> {
        self.events.lock().clone()
    }

    fn kinds(&self) -> Vec<CallEventKind> {
        self.events.lock().iter().map(CallEvent::kind).collect()
    }
}

impl EventBus for RecordingBus {
    fn publish(&self, event: CallEvent) {
        self.events.lock().push(event);
    }

    fn subscribe(&self, _kind: CallEventKind, _handler: Arc<dyn EventHandler>) {}
}

#[derive(Debug, Serialize)]
struct NewOrder {
    item: String,
    quantity: u32,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Order {
    id: u64,
    item: String,
}

type Harness = (AuditedClient, Arc<RecordingBus>);

fn http_client(server: &MockServer, policy: RetryPolicy) -> Result<Harness> {
    let config = ClientConfig {
        base_url: Some(server.uri()),
        read_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    };
    let transport = Arc::new(ReqwestTransport::new(config)?);
    let bus = Arc::new(RecordingBus::default());
    let client = AuditedClient::builder(transport, bus.clone())
        .retry_policy(policy)
        .clock(Arc::new(TestClock::new()))
        .build();
    Ok((client, bus))
}

#[tokio::test]
async fn typed_post_round_trips_json() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/orders"))
        .and(matchers::body_json(serde_json::json!({"item": "widget", "quantity": 2})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!({"id": 7, "item": "widget"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, bus) = http_client(&server, RetryPolicy::default())?;
    let order: Order =
        client.post_typed("/orders", &NewOrder { item: "widget".into(), quantity: 2 }).await?;

    assert_eq!(order, Order { id: 7, item: "widget".into() });
    assert_eq!(bus.kinds(), vec![CallEventKind::Initiated, CallEventKind::Success]);

    let events = bus.events();
    assert_eq!(events[0].request().payload(), Some(r#"{"item":"widget","quantity":2}"#));
    match &events[1] {
        CallEvent::Success(success) => assert_eq!(success.response.status_code(), 201),
        other => panic!("expected success, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn server_errors_are_retried_with_one_request_id() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/flaky"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .mount(&server)
        .await;

    let (client, bus) = http_client(&server, RetryPolicy::fixed(3, Duration::from_secs(1)))?;
    let response = client.get("/flaky").await?;
    assert_eq!(response.status_code(), 200);

    let events = bus.events();
    assert_eq!(
        bus.kinds(),
        vec![
            CallEventKind::Initiated,
            CallEventKind::Error,
            CallEventKind::Error,
            CallEventKind::Success
        ]
    );
    let id = events[0].request_id();
    assert!(events.iter().all(|event| event.request_id() == id));

    let retries: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            CallEvent::Error(failed) => Some((failed.retry_count, failed.is_retry)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(0, false), (1, true)]);

    match &events[1] {
        CallEvent::Error(failed) => {
            assert_eq!(failed.error.message, "HTTP 503: unavailable");
            assert_eq!(failed.error.classification.as_deref(), Some("server"));
        },
        other => panic!("expected error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn rate_limited_calls_exhaust_the_policy() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::any())
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(2)
        .mount(&server)
        .await;

    let (client, bus) = http_client(&server, RetryPolicy::fixed(2, Duration::from_secs(1)))?;
    let err = client.get("/limited").await.unwrap_err();

    match err {
        ClientError::RetryExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 2);
            assert!(matches!(last, TransportError::Status { status_code: 429, .. }));
        },
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(bus.kinds().len(), 3);
    Ok(())
}

#[tokio::test]
async fn slow_server_times_out_each_attempt() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::any())
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let (client, bus) = http_client(&server, RetryPolicy::fixed(2, Duration::from_millis(10)))?;
    let err = client.get("/slow").await.unwrap_err();

    assert!(matches!(
        err.transport_error(),
        Some(TransportError::Timeout { timeout_ms: 500 })
    ));
    assert_eq!(
        bus.kinds(),
        vec![CallEventKind::Initiated, CallEventKind::Error, CallEventKind::Error]
    );
    Ok(())
}

#[tokio::test]
async fn undecodable_response_still_publishes_success() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::always(200, "not json"));
    let bus = Arc::new(RecordingBus::default());
    let client = AuditedClient::new(transport.clone(), bus.clone());

    let err = client.get_typed::<Order>("/orders/1").await.unwrap_err();

    assert!(matches!(err, ClientError::Deserialization { .. }));
    assert_eq!(bus.kinds(), vec![CallEventKind::Initiated, CallEventKind::Success]);
    assert_eq!(transport.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn transport_panic_is_an_error_event() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new());
    transport.panic_with("socket exploded");
    let bus = Arc::new(RecordingBus::default());
    let client = AuditedClient::builder(transport, bus.clone())
        .retry_policy(RetryPolicy::fixed(3, Duration::from_millis(1)))
        .clock(Arc::new(TestClock::new()))
        .build();

    let err = client.get("/boom").await.unwrap_err();

    assert!(matches!(err, ClientError::Transport { source: TransportError::Internal { .. }, .. }));
    assert_eq!(bus.kinds(), vec![CallEventKind::Initiated, CallEventKind::Error]);
    Ok(())
}

#[tokio::test]
async fn detached_calls_report_through_their_handle() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(200, "{}").respond(202, "{}");
    let bus = Arc::new(RecordingBus::default());
    let client = AuditedClient::new(transport.clone(), bus.clone());

    let first = client.get_async("/a");
    let second = client.post_async("/b", "{}");
    assert_ne!(first.request_id(), second.request_id());

    let (first, second) = tokio::join!(first, second);
    let mut statuses = vec![first?.status_code(), second?.status_code()];
    statuses.sort_unstable();
    assert_eq!(statuses, vec![200, 202]);

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().any(|call| call.endpoint == "/b" && call.body.as_deref() == Some("{}")));
    Ok(())
}

fn unserializable() -> std::collections::HashMap<Vec<u8>, &'static str> {
    std::collections::HashMap::from([(vec![1_u8], "byte keys are not JSON object keys")])
}

#[tokio::test]
async fn detached_typed_get_keeps_success_when_decoding_fails() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(200, "not json");
    let bus = Arc::new(RecordingBus::default());
    let client = AuditedClient::new(transport, bus.clone());

    let handle = client.get_typed_async::<Order>("/orders/1");
    let request_id = handle.request_id().clone();
    let err = handle.await.unwrap_err();

    assert!(matches!(err, ClientError::Deserialization { .. }));
    assert_eq!(err.request_id(), Some(&request_id));
    assert_eq!(bus.kinds(), vec![CallEventKind::Initiated, CallEventKind::Success]);
    assert!(bus.events().iter().all(|event| event.request_id() == &request_id));
    Ok(())
}

#[tokio::test]
async fn detached_typed_post_decodes_response() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(201, r#"{"id":7,"item":"widget"}"#);
    let bus = Arc::new(RecordingBus::default());
    let client = AuditedClient::new(transport.clone(), bus.clone());

    let handle = client
        .post_typed_async::<_, Order>("/orders", &NewOrder { item: "widget".into(), quantity: 2 })?;
    let request_id = handle.request_id().clone();
    let order = handle.await?;

    assert_eq!(order, Order { id: 7, item: "widget".into() });
    assert_eq!(bus.kinds(), vec![CallEventKind::Initiated, CallEventKind::Success]);
    assert!(bus.events().iter().all(|event| event.request_id() == &request_id));
    assert_eq!(
        transport.calls()[0].body.as_deref(),
        Some(r#"{"item":"widget","quantity":2}"#)
    );
    Ok(())
}

#[tokio::test]
async fn detached_typed_post_rejects_unserializable_body() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::always(200, "{}"));
    let bus = Arc::new(RecordingBus::default());
    let client = AuditedClient::new(transport.clone(), bus.clone());

    let err = client.post_typed_async::<_, Order>("/orders", &unserializable()).unwrap_err();

    assert!(matches!(err, ClientError::Serialization { .. }));
    assert!(err.request_id().is_none());
    assert!(bus.events().is_empty());
    assert_eq!(transport.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn detached_json_post_sends_serialized_body() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(202, "{}");
    let bus = Arc::new(RecordingBus::default());
    let client = AuditedClient::new(transport.clone(), bus.clone());

    let handle =
        client.post_json_async("/orders", &NewOrder { item: "gadget".into(), quantity: 1 })?;
    let request_id = handle.request_id().clone();
    let response = handle.await?;

    assert_eq!(response.status_code(), 202);
    let events = bus.events();
    assert_eq!(bus.kinds(), vec![CallEventKind::Initiated, CallEventKind::Success]);
    assert!(events.iter().all(|event| event.request_id() == &request_id));
    assert_eq!(events[0].request().payload(), Some(r#"{"item":"gadget","quantity":1}"#));
    Ok(())
}

#[tokio::test]
async fn detached_json_post_rejects_unserializable_body() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::always(200, "{}"));
    let bus = Arc::new(RecordingBus::default());
    let client = AuditedClient::new(transport.clone(), bus.clone());

    let err = client.post_json_async("/orders", &unserializable()).unwrap_err();

    assert!(matches!(err, ClientError::Serialization { .. }));
    assert!(bus.events().is_empty());
    assert_eq!(transport.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn post_without_payload_sends_no_body() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/ping"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (client, bus) = http_client(&server, RetryPolicy::default())?;
    let response = client.call(HttpMethod::Post, "/ping", None).await?;

    assert_eq!(response.status_code(), 204);
    assert_eq!(bus.events()[0].request().payload(), None);
    let received = server.received_requests().await.unwrap_or_default();
    assert!(received[0].body.is_empty());
    assert!(received[0].headers.get("content-type").is_none());
    Ok(())
}
