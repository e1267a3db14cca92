// Append-only event log, backed by `event` (migrations/0001_init.sql).
// Grounded on the teacher's single-pool repository pattern
// (everruns-storage::repositories::Database) with sqlx::query_as used
// unchecked (no compile-time DB access) throughout.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use noetl_contracts::event::{Event, EventEnvelope, EventFilter, EventStatus, EventType};
use noetl_core::error::{CoreError, Result};
use noetl_core::snowflake::SnowflakeGenerator;
use noetl_core::traits::EventStore;
use serde_json::json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};

#[derive(Debug, FromRow)]
struct EventRow {
    event_id: i64,
    execution_id: i64,
    catalog_id: i64,
    parent_event_id: Option<i64>,
    node_id: Option<String>,
    node_name: Option<String>,
    event_type: String,
    status: String,
    timestamp: DateTime<Utc>,
    current_index: Option<i64>,
    attempt: Option<i32>,
    context: Option<serde_json::Value>,
    result: Option<serde_json::Value>,
    meta: Option<serde_json::Value>,
}

impl TryFrom<EventRow> for Event {
    type Error = CoreError;

    fn try_from(row: EventRow) -> std::result::Result<Self, Self::Error> {
        Ok(Event {
            event_id: row.event_id,
            execution_id: row.execution_id,
            catalog_id: row.catalog_id,
            parent_event_id: row.parent_event_id,
            node_id: row.node_id,
            node_name: row.node_name,
            event_type: EventType::from_str(&row.event_type)
                .map_err(|e| CoreError::EventStore(e.to_string()))?,
            status: status_from_str(&row.status)?,
            timestamp: row.timestamp,
            current_index: row.current_index,
            attempt: row.attempt,
            context: row.context,
            result: row.result,
            meta: row.meta,
        })
    }
}

fn status_from_str(s: &str) -> Result<EventStatus> {
    Ok(match s {
        "RUNNING" => EventStatus::Running,
        "COMPLETED" => EventStatus::Completed,
        "FAILED" => EventStatus::Failed,
        "CANCELLED" => EventStatus::Cancelled,
        other => return Err(CoreError::EventStore(format!("unknown event status: {other}"))),
    })
}

fn status_str(status: EventStatus) -> &'static str {
    match status {
        EventStatus::Running => "RUNNING",
        EventStatus::Completed => "COMPLETED",
        EventStatus::Failed => "FAILED",
        EventStatus::Cancelled => "CANCELLED",
    }
}

pub struct PgEventStore {
    pool: PgPool,
    ids: Arc<SnowflakeGenerator>,
}

impl PgEventStore {
    pub fn new(pool: PgPool, ids: Arc<SnowflakeGenerator>) -> Self {
        Self { pool, ids }
    }

    fn is_marker(event_type: EventType) -> bool {
        event_type.is_marker()
    }

    /// Folds `event` into the `workflow`/`step_state` projection tables,
    /// inside the caller's transaction. Mirrors `WorkflowState::apply_event`
    /// (noetl-core), but as incremental SQL rather than an in-memory fold.
    async fn apply_projection(tx: &mut Transaction<'_, Postgres>, event: &Event) -> Result<()> {
        match event.event_type {
            EventType::ExecutionStarted => {
                sqlx::query(
                    r#"
                    INSERT INTO workflow (execution_id, catalog_id, status, started_at, ctx_version, ctx)
                    VALUES ($1, $2, 'RUNNING', $3, 0, $4)
                    ON CONFLICT (execution_id) DO UPDATE
                    SET catalog_id = EXCLUDED.catalog_id, status = 'RUNNING', started_at = EXCLUDED.started_at
                    "#,
                )
                .bind(event.execution_id)
                .bind(event.catalog_id)
                .bind(event.timestamp)
                .bind(event.context.clone().unwrap_or_else(|| json!({})))
                .execute(&mut **tx)
                .await
                .map_err(|e| CoreError::EventStore(e.to_string()))?;
            }
            EventType::ExecutionCompleted | EventType::ExecutionFailed | EventType::ExecutionCancelled => {
                let status = match event.event_type {
                    EventType::ExecutionCompleted => "COMPLETED",
                    EventType::ExecutionFailed => "FAILED",
                    _ => "CANCELLED",
                };
                sqlx::query("UPDATE workflow SET status = $1, ended_at = $2 WHERE execution_id = $3")
                    .bind(status)
                    .bind(event.timestamp)
                    .bind(event.execution_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| CoreError::EventStore(e.to_string()))?;
            }
            EventType::CtxPatched => {
                if let Some(patch) = &event.context {
                    sqlx::query(
                        r#"
                        UPDATE workflow
                        SET ctx = ctx || $1, ctx_version = ctx_version + 1
                        WHERE execution_id = $2
                        "#,
                    )
                    .bind(patch)
                    .bind(event.execution_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| CoreError::EventStore(e.to_string()))?;
                }
            }
            EventType::StepStarted => {
                if let Some(step) = &event.node_name {
                    sqlx::query(
                        r#"
                        INSERT INTO step_state (execution_id, step, status, current_index, started_at)
                        VALUES ($1, $2, 'RUNNING', $3, $4)
                        ON CONFLICT (execution_id, step) DO UPDATE
                        SET status = 'RUNNING', current_index = EXCLUDED.current_index, started_at = EXCLUDED.started_at
                        "#,
                    )
                    .bind(event.execution_id)
                    .bind(step)
                    .bind(event.current_index)
                    .bind(event.timestamp)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| CoreError::EventStore(e.to_string()))?;
                }
            }
            EventType::StepDone | EventType::StepFailed | EventType::StepCancelled => {
                if let Some(step) = &event.node_name {
                    let status = match event.event_type {
                        EventType::StepDone => "COMPLETED",
                        EventType::StepFailed => "FAILED",
                        _ => "CANCELLED",
                    };
                    sqlx::query(
                        r#"
                        INSERT INTO step_state (execution_id, step, status, ended_at)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (execution_id, step) DO UPDATE
                        SET status = EXCLUDED.status, ended_at = EXCLUDED.ended_at
                        "#,
                    )
                    .bind(event.execution_id)
                    .bind(step)
                    .bind(status)
                    .bind(event.timestamp)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| CoreError::EventStore(e.to_string()))?;
                }
            }
            EventType::LoopIteration => {
                if let Some(step) = &event.node_name {
                    sqlx::query(
                        r#"
                        INSERT INTO step_state (execution_id, step, status, current_index)
                        VALUES ($1, $2, 'RUNNING', $3)
                        ON CONFLICT (execution_id, step) DO UPDATE
                        SET current_index = GREATEST(COALESCE(step_state.current_index, 0), EXCLUDED.current_index)
                        "#,
                    )
                    .bind(event.execution_id)
                    .bind(step)
                    .bind(event.current_index)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| CoreError::EventStore(e.to_string()))?;
                }
            }
            EventType::LoopDone => {
                if let Some(step) = &event.node_name {
                    sqlx::query(
                        r#"
                        UPDATE step_state SET status = 'COMPLETED', ended_at = $1, total = current_index + 1
                        WHERE execution_id = $2 AND step = $3
                        "#,
                    )
                    .bind(event.timestamp)
                    .bind(event.execution_id)
                    .bind(step)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| CoreError::EventStore(e.to_string()))?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, envelope: EventEnvelope) -> Result<Event> {
        let event_id = self.ids.next_id();
        let timestamp = envelope.timestamp.unwrap_or_else(Utc::now);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::EventStore(e.to_string()))?;

        let row: Option<EventRow> = if Self::is_marker(envelope.event_type) {
            sqlx::query_as::<_, EventRow>(
                r#"
                INSERT INTO event (
                    event_id, execution_id, catalog_id, parent_event_id, node_id,
                    node_name, event_type, status, timestamp, current_index,
                    attempt, context, result, meta
                )
                VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
                )
                ON CONFLICT DO NOTHING
                RETURNING event_id, execution_id, catalog_id, parent_event_id, node_id,
                    node_name, event_type, status, timestamp, current_index,
                    attempt, context, result, meta
                "#,
            )
            .bind(event_id)
            .bind(envelope.execution_id)
            .bind(envelope.catalog_id)
            .bind(envelope.parent_event_id)
            .bind(&envelope.node_id)
            .bind(&envelope.node_name)
            .bind(envelope.event_type.to_string())
            .bind(status_str(envelope.status))
            .bind(timestamp)
            .bind(envelope.current_index)
            .bind(envelope.attempt)
            .bind(&envelope.context)
            .bind(&envelope.result)
            .bind(&envelope.meta)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| CoreError::EventStore(e.to_string()))?
        } else {
            sqlx::query_as::<_, EventRow>(
                r#"
                INSERT INTO event (
                    event_id, execution_id, catalog_id, parent_event_id, node_id,
                    node_name, event_type, status, timestamp, current_index,
                    attempt, context, result, meta
                )
                VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
                )
                RETURNING event_id, execution_id, catalog_id, parent_event_id, node_id,
                    node_name, event_type, status, timestamp, current_index,
                    attempt, context, result, meta
                "#,
            )
            .bind(event_id)
            .bind(envelope.execution_id)
            .bind(envelope.catalog_id)
            .bind(envelope.parent_event_id)
            .bind(&envelope.node_id)
            .bind(&envelope.node_name)
            .bind(envelope.event_type.to_string())
            .bind(status_str(envelope.status))
            .bind(timestamp)
            .bind(envelope.current_index)
            .bind(envelope.attempt)
            .bind(&envelope.context)
            .bind(&envelope.result)
            .bind(&envelope.meta)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| CoreError::EventStore(e.to_string()))?
        };

        let row = match row {
            Some(row) => row,
            None => {
                // Marker conflict: the event already exists, fetch it so
                // callers get a stable idempotent result. step.started is
                // keyed by attempt, loop.iteration by current_index -- the
                // same keys the two uq_event_marker_* indexes use.
                if envelope.event_type == EventType::LoopIteration {
                    sqlx::query_as::<_, EventRow>(
                        r#"
                        SELECT event_id, execution_id, catalog_id, parent_event_id, node_id,
                            node_name, event_type, status, timestamp, current_index,
                            attempt, context, result, meta
                        FROM event
                        WHERE execution_id = $1
                            AND COALESCE(node_name, '') = COALESCE($2, '')
                            AND event_type = $3
                            AND current_index = $4
                        "#,
                    )
                    .bind(envelope.execution_id)
                    .bind(&envelope.node_name)
                    .bind(envelope.event_type.to_string())
                    .bind(envelope.current_index)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| CoreError::EventStore(e.to_string()))?
                } else {
                    sqlx::query_as::<_, EventRow>(
                        r#"
                        SELECT event_id, execution_id, catalog_id, parent_event_id, node_id,
                            node_name, event_type, status, timestamp, current_index,
                            attempt, context, result, meta
                        FROM event
                        WHERE execution_id = $1
                            AND COALESCE(node_name, '') = COALESCE($2, '')
                            AND event_type = $3
                            AND COALESCE(attempt, -1) = COALESCE($4, -1)
                        "#,
                    )
                    .bind(envelope.execution_id)
                    .bind(&envelope.node_name)
                    .bind(envelope.event_type.to_string())
                    .bind(envelope.attempt)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| CoreError::EventStore(e.to_string()))?
                }
            }
        };

        let event = Event::try_from(row)?;

        // Projection update happens in the same transaction as the
        // event insert (spec.md §4.1): step_state/workflow never drift
        // from the log that produced them.
        Self::apply_projection(&mut tx, &event).await?;

        tx.commit().await.map_err(|e| CoreError::EventStore(e.to_string()))?;

        Ok(event)
    }

    async fn query(&self, filter: EventFilter) -> Result<Vec<Event>> {
        let mut builder = QueryBuilder::new(
            r#"SELECT event_id, execution_id, catalog_id, parent_event_id, node_id,
                node_name, event_type, status, timestamp, current_index,
                attempt, context, result, meta
            FROM event WHERE 1=1"#,
        );

        if let Some(execution_id) = filter.execution_id {
            builder.push(" AND execution_id = ").push_bind(execution_id);
        }
        if let Some(event_type) = filter.event_type {
            builder.push(" AND event_type = ").push_bind(event_type.to_string());
        }
        if let Some(node_name) = &filter.node_name {
            builder.push(" AND node_name = ").push_bind(node_name.clone());
        }
        if let Some(attempt) = filter.attempt {
            builder.push(" AND attempt = ").push_bind(attempt);
        }
        builder.push(" ORDER BY event_id ASC");

        let rows: Vec<EventRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::EventStore(e.to_string()))?;

        rows.into_iter().map(Event::try_from).collect()
    }
}
