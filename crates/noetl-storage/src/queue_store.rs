// Durable work queue backed by `queue` (migrations/0001_init.sql).
//
// Leasing uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
// block on each other's lease attempt -- the row-lock replaces the
// legacy system's app-level command-claim table (see DESIGN.md for the
// rationale).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use noetl_contracts::queue::{QueueItem, QueuePayload, QueueStatus};
use noetl_core::error::{CoreError, Result};
use noetl_core::snowflake::SnowflakeGenerator;
use noetl_core::traits::QueueStore;
use sqlx::{FromRow, PgPool};

#[derive(Debug, FromRow)]
struct QueueRow {
    queue_id: i64,
    execution_id: i64,
    catalog_id: i64,
    step: String,
    status: String,
    payload: serde_json::Value,
    priority: i32,
    attempts: i32,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    available_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct QueueIdRow {
    queue_id: i64,
}

impl TryFrom<QueueRow> for QueueItem {
    type Error = CoreError;

    fn try_from(row: QueueRow) -> std::result::Result<Self, Self::Error> {
        let payload: QueuePayload = serde_json::from_value(row.payload)
            .map_err(|e| CoreError::Queue(format!("malformed queue payload: {e}")))?;
        Ok(QueueItem {
            queue_id: row.queue_id,
            execution_id: row.execution_id,
            catalog_id: row.catalog_id,
            step: row.step,
            status: status_from_str(&row.status)?,
            payload,
            priority: row.priority,
            attempts: row.attempts,
            lease_owner: row.lease_owner,
            lease_expires_at: row.lease_expires_at,
            available_at: row.available_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_from_str(s: &str) -> Result<QueueStatus> {
    Ok(match s {
        "queued" => QueueStatus::Queued,
        "leased" => QueueStatus::Leased,
        "done" => QueueStatus::Done,
        "dead" => QueueStatus::Dead,
        other => return Err(CoreError::Queue(format!("unknown queue status: {other}"))),
    })
}

pub struct PgQueueStore {
    pool: PgPool,
    ids: Arc<SnowflakeGenerator>,
}

impl PgQueueStore {
    pub fn new(pool: PgPool, ids: Arc<SnowflakeGenerator>) -> Self {
        Self { pool, ids }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(
        &self,
        execution_id: i64,
        catalog_id: i64,
        node_id: &str,
        step: &str,
        payload: QueuePayload,
        priority: i32,
    ) -> Result<i64> {
        let queue_id = self.ids.next_id();
        let attempt = payload.attempt;
        let payload_json = serde_json::to_value(&payload)
            .map_err(|e| CoreError::Queue(format!("failed to serialize queue payload: {e}")))?;

        let inserted: Option<QueueIdRow> = sqlx::query_as(
            r#"
            INSERT INTO queue (queue_id, execution_id, catalog_id, node_id, step, attempt, status, payload, priority)
            VALUES ($1, $2, $3, $4, $5, $6, 'queued', $7, $8)
            ON CONFLICT (execution_id, node_id, attempt) DO NOTHING
            RETURNING queue_id
            "#,
        )
        .bind(queue_id)
        .bind(execution_id)
        .bind(catalog_id)
        .bind(node_id)
        .bind(step)
        .bind(attempt)
        .bind(payload_json)
        .bind(priority)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Queue(e.to_string()))?;

        let queue_id = match inserted {
            Some(row) => row.queue_id,
            None => {
                // Racing/repeated enqueue for the same node-run: return
                // the row that already won instead of inserting a second
                // copy of the work.
                let existing: QueueIdRow = sqlx::query_as(
                    r#"
                    SELECT queue_id FROM queue
                    WHERE execution_id = $1 AND node_id = $2 AND attempt = $3
                    "#,
                )
                .bind(execution_id)
                .bind(node_id)
                .bind(attempt)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| CoreError::Queue(e.to_string()))?;
                existing.queue_id
            }
        };

        Ok(queue_id)
    }

    async fn lease(
        &self,
        worker_id: &str,
        max_items: u32,
        lease_seconds: i64,
    ) -> Result<Vec<QueueItem>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;

        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            SELECT queue_id, execution_id, catalog_id, step, status, payload,
                priority, attempts, lease_owner, lease_expires_at, available_at,
                created_at, updated_at
            FROM queue
            WHERE status = 'queued' AND available_at <= now()
            ORDER BY priority DESC, queue_id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(max_items as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| CoreError::Queue(e.to_string()))?;

        if rows.is_empty() {
            tx.commit().await.map_err(|e| CoreError::Queue(e.to_string()))?;
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.queue_id).collect();
        sqlx::query(
            r#"
            UPDATE queue
            SET status = 'leased', lease_owner = $1,
                lease_expires_at = now() + make_interval(secs => $2),
                attempts = attempts + 1, updated_at = now()
            WHERE queue_id = ANY($3)
            "#,
        )
        .bind(worker_id)
        .bind(lease_seconds as f64)
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Queue(e.to_string()))?;

        tx.commit().await.map_err(|e| CoreError::Queue(e.to_string()))?;

        rows.into_iter().map(QueueItem::try_from).collect()
    }

    async fn heartbeat(&self, queue_id: i64, worker_id: &str, extend_seconds: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE queue
            SET lease_expires_at = now() + make_interval(secs => $1), updated_at = now()
            WHERE queue_id = $2 AND lease_owner = $3 AND status = 'leased'
            "#,
        )
        .bind(extend_seconds as f64)
        .bind(queue_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Queue(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::LeaseExpired(queue_id));
        }
        Ok(())
    }

    async fn complete(&self, queue_id: i64, worker_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE queue
            SET status = 'done', updated_at = now()
            WHERE queue_id = $1 AND lease_owner = $2
            "#,
        )
        .bind(queue_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Queue(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::LeaseExpired(queue_id));
        }
        Ok(())
    }

    async fn fail(
        &self,
        queue_id: i64,
        worker_id: &str,
        message: &str,
        retryable: bool,
    ) -> Result<()> {
        if retryable {
            sqlx::query(
                r#"
                UPDATE queue
                SET status = 'queued', lease_owner = NULL, lease_expires_at = NULL,
                    available_at = now(), updated_at = now(),
                    payload = jsonb_set(payload, '{last_error}', to_jsonb($3::text))
                WHERE queue_id = $1 AND lease_owner = $2
                "#,
            )
            .bind(queue_id)
            .bind(worker_id)
            .bind(message)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;
        } else {
            sqlx::query(
                r#"
                UPDATE queue
                SET status = 'dead', updated_at = now(),
                    payload = jsonb_set(payload, '{last_error}', to_jsonb($3::text))
                WHERE queue_id = $1 AND lease_owner = $2
                "#,
            )
            .bind(queue_id)
            .bind(worker_id)
            .bind(message)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;
        }
        Ok(())
    }

    async fn reap_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queue
            SET status = 'queued', lease_owner = NULL, lease_expires_at = NULL, updated_at = now()
            WHERE status = 'leased' AND lease_expires_at < now()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Queue(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
