//! # PostgreSQL Datastore
//!
//! sqlx-backed implementation of [`TransactionalDatastore`] and
//! [`CheckpointRepository`].
//!
//! Each `begin` opens a pooled transaction and applies the requested isolation
//! level; the returned [`PgSession`] runs checkpoint queries on that transaction
//! until the wrapper commits or rolls it back. Queries outside a transaction run
//! directly on the pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, PgExecutor, Postgres, Transaction};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::datastore::{CheckpointRepository, DatastoreError, TransactionalDatastore};
use super::transaction::IsolationLevel;
use crate::batch::{BatchCheckpoint, CheckpointUpdate, FailedItem};
use crate::config::DatabaseConfig;
use crate::constants::CHECKPOINT_TABLE;

const SCHEMA_SQL: &str = include_str!("../../migrations/20250101000000_create_batch_checkpoints.sql");

#[derive(Debug, FromRow)]
struct CheckpointRow {
    id: Uuid,
    job_id: String,
    completed_items: Json<Vec<String>>,
    failed_items: Json<Vec<FailedItem>>,
    progress_percentage: i32,
    last_checkpoint_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CheckpointRow> for BatchCheckpoint {
    fn from(row: CheckpointRow) -> Self {
        Self {
            id: row.id,
            job_id: row.job_id,
            completed_items: row.completed_items.0,
            failed_items: row.failed_items.0,
            progress_percentage: row.progress_percentage,
            last_checkpoint_at: row.last_checkpoint_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const CHECKPOINT_COLUMNS: &str = "id, job_id, completed_items, failed_items, progress_percentage, \
     last_checkpoint_at, created_at, updated_at";

async fn upsert_checkpoint<'e, E: PgExecutor<'e>>(
    executor: E,
    update: &CheckpointUpdate,
) -> Result<BatchCheckpoint, DatastoreError> {
    let sql = format!(
        "INSERT INTO {CHECKPOINT_TABLE} \
             (id, job_id, completed_items, failed_items, progress_percentage, last_checkpoint_at, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, NOW(), NOW(), NOW()) \
         ON CONFLICT (job_id) DO UPDATE SET \
             completed_items = EXCLUDED.completed_items, \
             failed_items = EXCLUDED.failed_items, \
             progress_percentage = EXCLUDED.progress_percentage, \
             last_checkpoint_at = NOW(), \
             updated_at = NOW() \
         RETURNING {CHECKPOINT_COLUMNS}"
    );

    let row: CheckpointRow = sqlx::query_as(&sql)
        .bind(Uuid::new_v4())
        .bind(&update.job_id)
        .bind(Json(&update.completed_items))
        .bind(Json(&update.failed_items))
        .bind(update.progress_percentage)
        .fetch_one(executor)
        .await?;

    Ok(row.into())
}

async fn find_checkpoint<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: &str,
) -> Result<Option<BatchCheckpoint>, DatastoreError> {
    let sql = format!("SELECT {CHECKPOINT_COLUMNS} FROM {CHECKPOINT_TABLE} WHERE job_id = $1");
    let row: Option<CheckpointRow> = sqlx::query_as(&sql)
        .bind(job_id)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(Into::into))
}

async fn delete_checkpoint<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: &str,
) -> Result<bool, DatastoreError> {
    let sql = format!("DELETE FROM {CHECKPOINT_TABLE} WHERE job_id = $1");
    let result = sqlx::query(&sql).bind(job_id).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

async fn find_incomplete_checkpoints<'e, E: PgExecutor<'e>>(
    executor: E,
) -> Result<Vec<BatchCheckpoint>, DatastoreError> {
    let sql = format!(
        "SELECT {CHECKPOINT_COLUMNS} FROM {CHECKPOINT_TABLE} \
         WHERE progress_percentage < 100 ORDER BY updated_at DESC"
    );
    let rows: Vec<CheckpointRow> = sqlx::query_as(&sql).fetch_all(executor).await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

/// PostgreSQL-backed datastore
#[derive(Debug, Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool using the database section of the configuration
    pub async fn connect(config: &DatabaseConfig, environment: &str) -> Result<Self, DatastoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.database_url(environment))
            .await?;

        info!(
            max_connections = config.max_connections,
            environment, "Connected checkpoint datastore"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the checkpoint table and its indexes if they are missing
    pub async fn ensure_schema(&self) -> Result<(), DatastoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        debug!(table = CHECKPOINT_TABLE, "Checkpoint schema ensured");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<bool, DatastoreError> {
        let (health,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(health == 1)
    }
}

/// Open transaction returned by [`PgDatastore::begin`]
#[derive(Debug)]
pub struct PgSession {
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

fn closed_session() -> DatastoreError {
    DatastoreError::new("Transaction already finished")
}

#[async_trait]
impl TransactionalDatastore for PgDatastore {
    type Handle = PgSession;

    async fn begin(&self, isolation_level: IsolationLevel) -> Result<PgSession, DatastoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            isolation_level.as_sql()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(PgSession {
            tx: Mutex::new(Some(tx)),
        })
    }

    async fn commit(&self, handle: &PgSession) -> Result<(), DatastoreError> {
        let tx = handle.tx.lock().await.take().ok_or_else(closed_session)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, handle: &PgSession) -> Result<(), DatastoreError> {
        // Nothing to undo once commit has consumed the transaction
        match handle.tx.lock().await.take() {
            Some(tx) => Ok(tx.rollback().await?),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CheckpointRepository for PgDatastore {
    async fn upsert_checkpoint(
        &self,
        update: &CheckpointUpdate,
    ) -> Result<BatchCheckpoint, DatastoreError> {
        upsert_checkpoint(&self.pool, update).await
    }

    async fn find_checkpoint(
        &self,
        job_id: &str,
    ) -> Result<Option<BatchCheckpoint>, DatastoreError> {
        find_checkpoint(&self.pool, job_id).await
    }

    async fn delete_checkpoint(&self, job_id: &str) -> Result<bool, DatastoreError> {
        delete_checkpoint(&self.pool, job_id).await
    }

    async fn find_incomplete_checkpoints(&self) -> Result<Vec<BatchCheckpoint>, DatastoreError> {
        find_incomplete_checkpoints(&self.pool).await
    }
}

#[async_trait]
impl CheckpointRepository for PgSession {
    async fn upsert_checkpoint(
        &self,
        update: &CheckpointUpdate,
    ) -> Result<BatchCheckpoint, DatastoreError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_session)?;
        upsert_checkpoint(&mut **tx, update).await
    }

    async fn find_checkpoint(
        &self,
        job_id: &str,
    ) -> Result<Option<BatchCheckpoint>, DatastoreError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_session)?;
        find_checkpoint(&mut **tx, job_id).await
    }

    async fn delete_checkpoint(&self, job_id: &str) -> Result<bool, DatastoreError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_session)?;
        delete_checkpoint(&mut **tx, job_id).await
    }

    async fn find_incomplete_checkpoints(&self) -> Result<Vec<BatchCheckpoint>, DatastoreError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(closed_session)?;
        find_incomplete_checkpoints(&mut **tx).await
    }
}
