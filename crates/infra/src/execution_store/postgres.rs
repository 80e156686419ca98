//! Postgres-backed execution store.
//!
//! Each execution is one row. The full record lives in a JSONB column and the
//! filterable fields are duplicated into plain columns so queries never have to
//! decode records they will discard.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | PoolClosed, Io, Tls, PoolTimedOut | `Unavailable` |
//! | Database (any code) | `Storage` |
//! | ColumnDecode, Decode | `Serialization` |
//! | Other | `Storage` |

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::instrument;

use fanout_core::ExecutionId;
use fanout_executions::{Execution, ExecutionFilter};

use super::r#trait::{ExecutionStore, StoreError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS executions (
    id            UUID PRIMARY KEY,
    change_id     TEXT NOT NULL,
    status        TEXT NOT NULL,
    priority      TEXT NOT NULL,
    initiated_by  TEXT NOT NULL,
    initiated_at  TIMESTAMPTZ NOT NULL,
    completed_at  TIMESTAMPTZ NULL,
    tenant_ids    TEXT[] NOT NULL,
    tags          JSONB NOT NULL DEFAULT '{}'::jsonb,
    record        JSONB NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS executions_initiated_at_idx ON executions (initiated_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS executions_status_idx ON executions (status);
CREATE INDEX IF NOT EXISTS executions_tenant_ids_idx ON executions USING GIN (tenant_ids);
"#;

/// Postgres-backed execution store.
///
/// `PostgresExecutionStore` is `Send + Sync` and cheap to clone; all
/// operations go through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresExecutionStore {
    pool: Arc<PgPool>,
}

impl PostgresExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and make sure the table exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExecutionStore for PostgresExecutionStore {
    #[instrument(
        skip(self, execution),
        fields(execution_id = %execution.id, status = execution.status.as_str()),
        err
    )]
    async fn put(&self, execution: &Execution) -> Result<(), StoreError> {
        let record = serde_json::to_value(execution)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tags = serde_json::to_value(&execution.tags)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tenant_ids: Vec<String> = execution
            .tenant_executions
            .keys()
            .map(|t| t.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO executions (
                id, change_id, status, priority, initiated_by, initiated_at,
                completed_at, tenant_ids, tags, record, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                completed_at = EXCLUDED.completed_at,
                tags = EXCLUDED.tags,
                record = EXCLUDED.record,
                updated_at = now()
            "#,
        )
        .bind(execution.id.as_uuid())
        .bind(&execution.change_id)
        .bind(execution.status.as_str())
        .bind(execution.priority.as_str())
        .bind(&execution.initiated_by)
        .bind(execution.initiated_at)
        .bind(execution.completed_at)
        .bind(&tenant_ids)
        .bind(&tags)
        .bind(&record)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(execution_id = %id), err)]
    async fn get(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query("SELECT record FROM executions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| decode_record(&r)).transpose()
    }

    #[instrument(skip(self, filter), fields(limit = filter.effective_limit()), err)]
    async fn query(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        let statuses: Option<Vec<String>> = if filter.status.is_empty() {
            None
        } else {
            Some(filter.status.iter().map(|s| s.as_str().to_string()).collect())
        };
        let tags = if filter.tags.is_empty() {
            None
        } else {
            Some(
                serde_json::to_value(&filter.tags)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            )
        };

        let rows = sqlx::query(
            r#"
            SELECT record
            FROM executions
            WHERE ($1::text[] IS NULL OR status = ANY($1))
                AND ($2::text IS NULL OR $2 = ANY(tenant_ids))
                AND ($3::text IS NULL OR initiated_by = $3)
                AND ($4::text IS NULL OR change_id = $4)
                AND ($5::timestamptz IS NULL OR initiated_at >= $5)
                AND ($6::timestamptz IS NULL OR initiated_at <= $6)
                AND ($7::jsonb IS NULL OR tags @> $7)
                AND ($8::text IS NULL OR priority = $8)
            ORDER BY initiated_at DESC, id DESC
            LIMIT $9 OFFSET $10
            "#,
        )
        .bind(statuses)
        .bind(filter.tenant_id.as_ref().map(|t| t.as_str().to_string()))
        .bind(filter.initiated_by.as_deref())
        .bind(filter.change_id.as_deref())
        .bind(filter.start_time)
        .bind(filter.end_time)
        .bind(tags)
        .bind(filter.priority.map(|p| p.as_str()))
        .bind(filter.effective_limit() as i64)
        .bind(filter.effective_offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query", e))?;

        rows.iter().map(decode_record).collect()
    }
}

fn decode_record(row: &sqlx::postgres::PgRow) -> Result<Execution, StoreError> {
    let value: serde_json::Value = row
        .try_get("record")
        .map_err(|e| StoreError::Serialization(format!("failed to read record column: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| StoreError::Serialization(format!("failed to decode execution: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::Database(db_err) => StoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {operation}: {err}"))
        }
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
