//! Subcommand implementations.

use std::{io::Write, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use callaudit_client::{AuditedClient, ClientError, Transport};
use callaudit_core::{
    AuditRecord, AuditStore, CallResponse, Clock, HttpMethod, PgAuditStore, RealClock, RequestId,
};
use callaudit_listener::AuditPipeline;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use crate::{
    cli::{CallArgs, QuerySelector},
    config::Config,
};

/// Outcome of `call`: the response or failure, and the rows recorded.
#[derive(Debug)]
pub struct CallReport {
    /// Correlation id of the call.
    pub request_id: RequestId,
    /// What the caller got back.
    pub outcome: Result<CallResponse, ClientError>,
    /// Rows stored for the call once the pipeline drained.
    pub rows: Vec<AuditRecord>,
}

/// Creates the connection pool, retrying while the database starts up.
///
/// # Errors
///
/// Fails when no connection can be established after the retries.
pub async fn create_database_pool(config: &Config) -> Result<PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_acquire_timeout))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("failed to verify database connection")?;
                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Creates the audit table and indexes.
///
/// # Errors
///
/// Fails if a DDL statement fails.
pub async fn migrate(store: &PgAuditStore) -> Result<()> {
    store.ensure_schema().await.context("failed to create audit schema")?;
    info!("audit schema ready");
    Ok(())
}

/// Performs one audited call through a freshly started pipeline and
/// collects the rows it produced.
///
/// The pipeline is drained and shut down before returning, so every row
/// the listener could write is visible in the report.
///
/// # Errors
///
/// Fails only if the pipeline cannot drain or the rows cannot be read; a
/// failed call is reported in [`CallReport::outcome`].
pub async fn call(
    config: &Config,
    store: Arc<dyn AuditStore>,
    transport: Arc<dyn Transport>,
    args: &CallArgs,
) -> Result<CallReport> {
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let pipeline = AuditPipeline::start(store.clone(), config.to_pipeline_config(), clock.clone());
    let client = AuditedClient::builder(transport, pipeline.bus())
        .retry_policy(config.to_retry_policy())
        .clock(clock)
        .build();

    let method = HttpMethod::from(args.method);
    let payload = match method {
        HttpMethod::Get if args.payload.is_some() => {
            warn!(endpoint = %args.endpoint, "ignoring --payload for GET");
            None
        },
        HttpMethod::Get => None,
        HttpMethod::Post => args.payload.clone(),
    };
    let handle = client.call_async(method, &args.endpoint, payload);
    let request_id = handle.request_id().clone();
    let outcome = handle.await;

    pipeline.shutdown(config.shutdown_timeout()).await.context("audit pipeline did not drain")?;

    let rows = store
        .find_by_request_id(&request_id)
        .await
        .with_context(|| format!("failed to read audit rows for {request_id}"))?;

    Ok(CallReport { request_id, outcome, rows })
}

/// Reads rows matching `selector`.
///
/// # Errors
///
/// Fails if the store query fails.
pub async fn query(store: &dyn AuditStore, selector: &QuerySelector) -> Result<Vec<AuditRecord>> {
    let rows = match selector {
        QuerySelector::RequestId(id) => store.find_by_request_id(id).await?,
        QuerySelector::Kind(kind) => store.find_by_event_kind(*kind).await?,
        QuerySelector::Endpoint(endpoint) => store.find_by_endpoint(endpoint).await?,
    };
    Ok(rows)
}

/// Writes one JSON document per row.
///
/// # Errors
///
/// Fails if serialization or the write fails.
pub fn write_rows(rows: &[AuditRecord], out: &mut impl Write) -> Result<()> {
    for row in rows {
        serde_json::to_writer(&mut *out, row)?;
        writeln!(out)?;
    }
    Ok(())
}

/// Writes the call outcome followed by its rows.
///
/// # Errors
///
/// Fails if serialization or the write fails.
pub fn write_report(report: &CallReport, out: &mut impl Write) -> Result<()> {
    match &report.outcome {
        Ok(response) => {
            writeln!(out, "request {} -> HTTP {}", report.request_id, response.status_code())?;
            writeln!(out, "{}", response.data())?;
        },
        Err(e) => writeln!(out, "request {} failed: {e}", report.request_id)?,
    }
    writeln!(out, "audit rows: {}", report.rows.len())?;
    write_rows(&report.rows, out)
}
