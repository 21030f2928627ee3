//! PostgreSQL-backed audit store.
//!
//! Rows live in a single `api_call_audit` table. Payload, response and
//! error message are `JSONB` so they can be queried structurally.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Executor, PgPool, Postgres, Transaction};
use tracing::debug;

use super::{AuditStore, TransactionScope};
use crate::{
    error::{CoreError, Result},
    models::{AuditRecord, EventKind, NewAuditRecord, RequestId},
};

const SELECT_COLUMNS: &str = "id, event_kind, request_id, endpoint, payload, response, \
                              status_code, error_message, occurred_at, retry_count, is_retry";

/// DDL for the audit table and its lookup indexes, applied in order.
pub const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS api_call_audit (
        id BIGSERIAL PRIMARY KEY,
        event_kind TEXT NOT NULL
            CHECK (event_kind IN ('INITIATED', 'SUCCESS', 'ERROR', 'RETRY_ERROR')),
        request_id TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        payload JSONB,
        response JSONB,
        status_code INTEGER,
        error_message JSONB,
        occurred_at TIMESTAMPTZ NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
        is_retry BOOLEAN NOT NULL DEFAULT FALSE
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_api_call_audit_request
    ON api_call_audit(request_id, occurred_at, id)
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_api_call_audit_kind
    ON api_call_audit(event_kind, occurred_at, id)
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_api_call_audit_endpoint
    ON api_call_audit(endpoint, occurred_at, id)
    ",
];

/// Audit store over a shared PostgreSQL pool.
///
/// Each `begin_isolated` call checks out its own connection and opens its
/// own transaction, so concurrent listener writes never share state.
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: Arc<PgPool>,
}

impl PgAuditStore {
    /// Creates a store over the given pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Creates the audit table and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns error if any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&*self.pool).await?;
        }
        debug!("audit schema ensured");
        Ok(())
    }

    /// Verifies the database answers a trivial query.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Unavailable` or `CoreError::Database` if the
    /// connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;
        Ok(())
    }

    async fn find_where(&self, column: &str, value: String) -> Result<Vec<AuditRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM api_call_audit WHERE {column} = $1 \
             ORDER BY occurred_at ASC, id ASC"
        );
        let rows =
            sqlx::query_as::<_, AuditRecord>(&sql).bind(value).fetch_all(&*self.pool).await?;

        Ok(rows)
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn begin_isolated(&self) -> Result<Box<dyn TransactionScope>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransactionScope { tx }))
    }

    async fn find_by_request_id(&self, request_id: &RequestId) -> Result<Vec<AuditRecord>> {
        self.find_where("request_id", request_id.as_str().to_string()).await
    }

    async fn find_by_event_kind(&self, kind: EventKind) -> Result<Vec<AuditRecord>> {
        self.find_where("event_kind", kind.as_str().to_string()).await
    }

    async fn find_by_endpoint(&self, endpoint: &str) -> Result<Vec<AuditRecord>> {
        self.find_where("endpoint", endpoint.to_string()).await
    }
}

/// Transaction scope holding one pooled connection.
///
/// Dropping it without commit rolls the transaction back when the
/// connection returns to the pool.
pub struct PgTransactionScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionScope for PgTransactionScope {
    async fn append(&mut self, record: &NewAuditRecord) -> Result<AuditRecord> {
        insert_impl(&mut *self.tx, record).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(|e| CoreError::CommitAmbiguous(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn insert_impl<'e, E>(executor: E, record: &NewAuditRecord) -> Result<AuditRecord>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        r"
        INSERT INTO api_call_audit (
            event_kind, request_id, endpoint,
            payload, response, status_code, error_message,
            occurred_at, retry_count, is_retry
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
        )
        RETURNING {SELECT_COLUMNS}
        "
    );

    let row = sqlx::query_as::<_, AuditRecord>(&sql)
        .bind(record.event_kind)
        .bind(&record.request_id)
        .bind(&record.endpoint)
        .bind(record.payload.as_ref().map(sqlx::types::Json))
        .bind(record.response.as_ref().map(sqlx::types::Json))
        .bind(record.status_code)
        .bind(record.error_message.as_ref().map(sqlx::types::Json))
        .bind(record.timestamp)
        .bind(record.retry_count)
        .bind(record.is_retry)
        .fetch_one(executor)
        .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_can_be_created_over_lazy_pool() {
        let pool = PgPool::connect_lazy("postgresql://test").unwrap();
        let store = PgAuditStore::new(Arc::new(pool));

        assert_eq!(Arc::strong_count(&store.pool()), 2);
    }

    #[test]
    fn schema_constrains_event_kinds() {
        let table = SCHEMA[0];
        for kind in EventKind::ALL {
            assert!(table.contains(&format!("'{kind}'")), "missing {kind} in CHECK constraint");
        }
    }

    #[test]
    fn every_lookup_column_is_indexed() {
        for column in ["request_id", "event_kind", "endpoint"] {
            assert!(
                SCHEMA[1..].iter().any(|ddl| ddl.contains(&format!("({column},"))),
                "no index leading with {column}"
            );
        }
    }
}
