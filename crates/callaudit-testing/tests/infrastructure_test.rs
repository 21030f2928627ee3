//! Tests for the test infrastructure itself.

use std::time::Duration;

use anyhow::Result;
use callaudit_client::{Transport, TransportError};
use callaudit_core::{AuditStore, CoreError, EventKind, HttpMethod, NewAuditRecord, RequestId};
use callaudit_testing::{FaultyStore, ScriptedTransport, TestEnv};
use chrono::Utc;

fn record() -> NewAuditRecord {
    NewAuditRecord {
        event_kind: EventKind::Initiated,
        request_id: RequestId::new(),
        endpoint: "/x".into(),
        payload: None,
        response: None,
        status_code: None,
        error_message: None,
        timestamp: Utc::now(),
        retry_count: 0,
        is_retry: false,
    }
}

#[tokio::test]
async fn scripted_transport_replays_in_order() -> Result<()> {
    let transport = ScriptedTransport::new();
    transport.respond(200, "first").fail(TransportError::timeout(5)).respond(201, "third");

    let first = transport.send(HttpMethod::Get, "/a", None).await?;
    let second = transport.send(HttpMethod::Post, "/b", Some("{}")).await;
    let third = transport.send(HttpMethod::Get, "/c", None).await?;
    let exhausted = transport.send(HttpMethod::Get, "/d", None).await;

    assert_eq!(first.body, "first");
    assert!(matches!(second, Err(TransportError::Timeout { timeout_ms: 5 })));
    assert_eq!(third.status_code, 201);
    assert!(matches!(exhausted, Err(TransportError::Configuration { .. })));
    assert_eq!(transport.call_count(), 4);
    assert_eq!(transport.calls()[1].body.as_deref(), Some("{}"));
    assert_eq!(transport.remaining(), 0);
    Ok(())
}

#[tokio::test]
async fn outage_blocks_writes_until_lifted() -> Result<()> {
    let store = FaultyStore::new();
    store.set_outage(true);

    let err = store.begin_isolated().await.err();
    assert!(matches!(err, Some(CoreError::Unavailable(_))));

    store.set_outage(false);
    let mut scope = store.begin_isolated().await?;
    scope.append(&record()).await?;
    scope.commit().await?;

    assert_eq!(store.memory().len(), 1);
    assert_eq!(store.begin_count(), 2);
    Ok(())
}

#[tokio::test]
async fn ambiguous_commit_still_persists() -> Result<()> {
    let store = FaultyStore::new();
    store.ambiguous_next_commits(1);

    let mut scope = store.begin_isolated().await?;
    scope.append(&record()).await?;
    let outcome = scope.commit().await;

    assert!(matches!(outcome, Err(CoreError::CommitAmbiguous(_))));
    assert_eq!(store.memory().len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_append_leaves_nothing_behind() -> Result<()> {
    let store = FaultyStore::new();
    store.fail_next_appends(1);

    let mut scope = store.begin_isolated().await?;
    assert!(scope.append(&record()).await.is_err());
    scope.rollback().await?;

    assert!(store.memory().is_empty());
    Ok(())
}

#[tokio::test]
async fn env_retries_on_virtual_time() -> Result<()> {
    let env = TestEnv::new();
    env.transport.fail_times(2).respond(200, "{}");

    env.client.get("/flaky").await?;
    env.settle().await?;

    assert_eq!(env.clock.elapsed(), Duration::from_secs(2));
    assert_eq!(env.all_rows().len(), 4);
    env.shutdown().await?;
    Ok(())
}
