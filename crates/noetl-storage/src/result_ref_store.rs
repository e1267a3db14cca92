// ResultRef storage backed by `result_ref` (migrations/0001_init.sql).
// Small task outputs are kept inline on the row; anything over
// `inline_max_bytes` is written to `result_ref_object` and referenced
// by `object_key`, paged back out through a single-page `Manifest`
// (no streaming store is wired up here, so every externalized result
// is one page).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use noetl_contracts::playbook::{ResultScope, ResultSpec, ResultStore};
use noetl_contracts::result_ref::{Manifest, ManifestPage, ResultRef};
use noetl_core::error::{CoreError, Result};
use noetl_core::snowflake::SnowflakeGenerator;
use sqlx::PgPool;

const DEFAULT_INLINE_MAX_BYTES: u64 = 32 * 1024;

pub struct PgResultRefStore {
    pool: PgPool,
    ids: Arc<SnowflakeGenerator>,
}

impl PgResultRefStore {
    pub fn new(pool: PgPool, ids: Arc<SnowflakeGenerator>) -> Self {
        Self { pool, ids }
    }

    fn extract(value: &serde_json::Value, spec: &ResultSpec) -> serde_json::Map<String, serde_json::Value> {
        let mut out = serde_json::Map::new();
        for rule in &spec.select {
            if let Some(found) = get_json_path(value, &rule.path) {
                out.insert(rule.name.clone(), found.clone());
            }
        }
        out
    }

    fn preview_of(value: &serde_json::Value) -> String {
        let s = value.to_string();
        const MAX: usize = 500;
        if s.len() > MAX {
            format!("{}...", &s[..MAX])
        } else {
            s
        }
    }
}

#[async_trait]
impl noetl_core::traits::ResultRefStore for PgResultRefStore {
    async fn store(
        &self,
        execution_id: i64,
        step: &str,
        task: Option<&str>,
        value: serde_json::Value,
        spec: &ResultSpec,
    ) -> Result<ResultRef> {
        let serialized = serde_json::to_vec(&value)
            .map_err(|e| CoreError::ResultStore(format!("failed to serialize result: {e}")))?;
        let size_bytes = serialized.len() as u64;
        let inline_max_bytes = spec.inline_max_bytes.unwrap_or(DEFAULT_INLINE_MAX_BYTES);
        let store = spec.store.unwrap_or_default();
        let scope = spec.scope.unwrap_or_default();
        let extracted = Self::extract(&value, spec);
        let preview = Self::preview_of(&value);
        let result_id = self.ids.next_id();
        let created_at = Utc::now();

        let (inline, object_key, manifest) = if size_bytes <= inline_max_bytes || matches!(store, ResultStore::Memory) {
            (Some(value), None, None)
        } else {
            let object_key = format!("result/{execution_id}/{result_id}");
            sqlx::query("INSERT INTO result_ref_object (object_key, data) VALUES ($1, $2)")
                .bind(&object_key)
                .bind(&serialized)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::ResultStore(e.to_string()))?;

            let manifest = Manifest {
                total_bytes: size_bytes,
                total_rows: None,
                pages: vec![ManifestPage {
                    page: 0,
                    byte_offset: 0,
                    byte_len: size_bytes,
                    row_count: None,
                }],
            };
            (None, Some(object_key), Some(manifest))
        };

        sqlx::query(
            r#"
            INSERT INTO result_ref (
                result_id, execution_id, step, task, store, scope,
                object_key, inline, manifest, extracted, preview, size_bytes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(result_id)
        .bind(execution_id)
        .bind(step)
        .bind(task)
        .bind(store_str(store))
        .bind(scope_str(scope))
        .bind(&object_key)
        .bind(&inline)
        .bind(manifest.as_ref().map(|m| serde_json::to_value(m).unwrap()))
        .bind(serde_json::Value::Object(extracted.clone()))
        .bind(&preview)
        .bind(size_bytes as i64)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::ResultStore(e.to_string()))?;

        Ok(ResultRef {
            result_id,
            execution_id,
            step: step.to_string(),
            task: task.map(|s| s.to_string()),
            store,
            scope,
            object_key,
            inline,
            manifest,
            extracted,
            preview: Some(preview),
            size_bytes,
            created_at,
            expires_at: None,
        })
    }

    async fn resolve(&self, result_id: i64, page: Option<u32>) -> Result<serde_json::Value> {
        let row: Option<(Option<serde_json::Value>, Option<String>)> =
            sqlx::query_as("SELECT inline, object_key FROM result_ref WHERE result_id = $1")
                .bind(result_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoreError::ResultStore(e.to_string()))?;

        let (inline, object_key) = row.ok_or_else(|| {
            CoreError::ResultStore(format!("no result_ref with id {result_id}"))
        })?;

        if let Some(value) = inline {
            return Ok(value);
        }

        let object_key = object_key.ok_or_else(|| {
            CoreError::ResultStore(format!("result_ref {result_id} has neither inline nor object_key"))
        })?;

        // A single page covers the whole object today; `page` is accepted
        // for forward compatibility with a real streaming store.
        let _ = page;
        let data: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM result_ref_object WHERE object_key = $1")
                .bind(&object_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoreError::ResultStore(e.to_string()))?;

        let (data,) = data.ok_or_else(|| {
            CoreError::ResultStore(format!("object {object_key} missing from result_ref_object"))
        })?;

        serde_json::from_slice(&data)
            .map_err(|e| CoreError::ResultStore(format!("malformed externalized result: {e}")))
    }
}

/// Dotted-path lookup into a result payload for `result.select[]` rules.
/// Root segment indexes straight into `value` (no namespace prefix, unlike
/// `Scope::get_path`, since a result payload has no named scopes).
fn get_json_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for seg in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(seg)?,
            serde_json::Value::Array(arr) => arr.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn store_str(store: ResultStore) -> &'static str {
    match store {
        ResultStore::NatsKv => "nats_kv",
        ResultStore::NatsObject => "nats_object",
        ResultStore::Gcs => "gcs",
        ResultStore::Postgres => "postgres",
        ResultStore::Memory => "memory",
    }
}

fn scope_str(scope: ResultScope) -> &'static str {
    match scope {
        ResultScope::Step => "step",
        ResultScope::Execution => "execution",
        ResultScope::Workflow => "workflow",
        ResultScope::Permanent => "permanent",
    }
}
