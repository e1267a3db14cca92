// Postgres tool adapter (`kind: postgres`). Config fields: `query`
// (required), `params` (optional array of scalar bind values). The
// connection DSN comes from the resolved credential's `secret.dsn`
// field when present, else a `connection` config string -- the DSN
// itself is never copied into `Outcome.result`.

use async_trait::async_trait;
use chrono::Utc;
use noetl_contracts::outcome::{ErrorKind, Outcome, OutcomeError, OutcomeMeta, PgOutcomeDetail};
use noetl_contracts::playbook::ToolTask;
use noetl_core::scope::Scope;
use noetl_core::traits::{ResolvedCredential, ToolAdapter};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};

pub struct PostgresAdapter;

#[async_trait]
impl ToolAdapter for PostgresAdapter {
    async fn execute(&self, task: &ToolTask, _scope: &Scope, credential: Option<ResolvedCredential>) -> Outcome {
        let started_at = Utc::now();
        let meta = || OutcomeMeta {
            attempt: 1,
            duration_ms: (Utc::now() - started_at).num_milliseconds(),
            started_at,
            ended_at: Utc::now(),
        };

        let Some(query) = task.config_str("query") else {
            return Outcome::error(
                OutcomeError {
                    kind: ErrorKind::Validation,
                    retryable: false,
                    message: "postgres task is missing required field 'query'".to_string(),
                    code: None,
                    extras: Default::default(),
                },
                meta(),
            );
        };

        let dsn = credential
            .as_ref()
            .and_then(|c| c.secret.get("dsn"))
            .and_then(|v| v.as_str())
            .or_else(|| task.config_str("connection"));

        let Some(dsn) = dsn else {
            return Outcome::error(
                OutcomeError {
                    kind: ErrorKind::Validation,
                    retryable: false,
                    message: "postgres task has no connection DSN (credential.secret.dsn or config.connection)".to_string(),
                    code: None,
                    extras: Default::default(),
                },
                meta(),
            );
        };

        let pool = match PgPoolOptions::new().max_connections(1).connect(dsn).await {
            Ok(pool) => pool,
            Err(err) => {
                return Outcome::error(
                    OutcomeError {
                        kind: ErrorKind::Network,
                        retryable: true,
                        message: format!("postgres connect failed: {err}"),
                        code: None,
                        extras: Default::default(),
                    },
                    meta(),
                );
            }
        };

        let params = task.config.get("params").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let mut q = sqlx::query(query);
        for param in &params {
            q = bind_json(q, param);
        }

        match q.fetch_all(&pool).await {
            Ok(rows) => {
                let values: Vec<Value> = rows.iter().map(row_to_json).collect();
                let mut outcome = Outcome::ok(Value::Array(values), meta());
                outcome.pg = Some(PgOutcomeDetail { code: None, sqlstate: None });
                outcome
            }
            Err(err) => {
                let sqlstate = match &err {
                    sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
                    _ => None,
                };
                let mut outcome = Outcome::error(
                    OutcomeError {
                        kind: ErrorKind::Internal,
                        retryable: false,
                        message: format!("postgres query failed: {err}"),
                        code: sqlstate.clone(),
                        extras: Default::default(),
                    },
                    meta(),
                );
                outcome.pg = Some(PgOutcomeDetail { code: None, sqlstate });
                outcome
            }
        }
    }
}

fn bind_json<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => q.bind(None::<String>),
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) if n.is_i64() => q.bind(n.as_i64()),
        Value::Number(n) => q.bind(n.as_f64()),
        Value::String(s) => q.bind(s.as_str()),
        other => q.bind(other.to_string()),
    }
}

/// Best-effort column decode: tries the common scalar types in order
/// and falls back to the raw text representation when the driver's
/// column type isn't one this adapter special-cases.
fn row_to_json(row: &PgRow) -> Value {
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name().to_string();
        let value = match col.type_info().name() {
            "INT8" | "BIGINT" => row.try_get::<Option<i64>, _>(col.ordinal()).ok().flatten().map(|v| Value::from(v)),
            "INT4" | "INTEGER" => row.try_get::<Option<i32>, _>(col.ordinal()).ok().flatten().map(Value::from),
            "FLOAT8" | "DOUBLE PRECISION" => row.try_get::<Option<f64>, _>(col.ordinal()).ok().flatten().map(Value::from),
            "BOOL" | "BOOLEAN" => row.try_get::<Option<bool>, _>(col.ordinal()).ok().flatten().map(Value::from),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(col.ordinal()).ok().flatten(),
            "TIMESTAMPTZ" | "TIMESTAMP" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(col.ordinal())
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_rfc3339())),
            _ => row.try_get::<Option<String>, _>(col.ordinal()).ok().flatten().map(Value::String),
        }
        .unwrap_or(Value::Null);
        map.insert(name, value);
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_contracts::playbook::ToolKind;

    #[tokio::test]
    async fn missing_query_is_a_validation_error() {
        let task = ToolTask { kind: ToolKind::Postgres, spec: None, config: Default::default() };
        let outcome = PostgresAdapter.execute(&task, &Scope::new(), None).await;
        let err = outcome.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn missing_dsn_is_a_validation_error() {
        let mut config = serde_json::Map::new();
        config.insert("query".to_string(), serde_json::json!("select 1"));
        let task = ToolTask { kind: ToolKind::Postgres, spec: None, config };
        let outcome = PostgresAdapter.execute(&task, &Scope::new(), None).await;
        let err = outcome.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("DSN"));
    }
}
