// Pluggable-backend traits (spec.md §4 "Components"). Mirrors the
// teacher's storage-agnostic trait split (EventEmitter/MessageStore/
// ToolExecutor): this crate defines the seams, noetl-storage and
// noetl-tools provide the implementations, so orchestrator/worker code
// never depends on sqlx or a specific tool SDK directly.

use async_trait::async_trait;
use noetl_contracts::event::{Event, EventEnvelope, EventFilter};
use noetl_contracts::outcome::Outcome;
use noetl_contracts::playbook::ToolTask;
use noetl_contracts::queue::{QueueItem, QueuePayload};
use noetl_contracts::result_ref::ResultRef;

use crate::error::Result;
use crate::scope::Scope;

/// Append-only event log (spec.md §3 "Event"). `append` must be
/// idempotent under retry: the same `(execution_id, node_name,
/// event_type, attempt)` tuple for marker event types must not produce
/// two rows.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, envelope: EventEnvelope) -> Result<Event>;
    async fn append_batch(&self, envelopes: Vec<EventEnvelope>) -> Result<Vec<Event>> {
        let mut out = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            out.push(self.append(envelope).await?);
        }
        Ok(out)
    }
    async fn query(&self, filter: EventFilter) -> Result<Vec<Event>>;
    async fn get_by_execution(&self, execution_id: i64) -> Result<Vec<Event>> {
        self.query(EventFilter {
            execution_id: Some(execution_id),
            ..Default::default()
        })
        .await
    }
}

/// Durable work queue with `queued -> leased -> {done, dead}` lifecycle
/// (spec.md §4.2). `enqueue` must be idempotent under retry:
/// `unique(execution_id, node_id, attempt)` collapses a racing or
/// repeated enqueue for the same node-run onto one row.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(
        &self,
        execution_id: i64,
        catalog_id: i64,
        node_id: &str,
        step: &str,
        payload: QueuePayload,
        priority: i32,
    ) -> Result<i64>;

    async fn lease(&self, worker_id: &str, max_items: u32, lease_seconds: i64)
        -> Result<Vec<QueueItem>>;

    async fn heartbeat(&self, queue_id: i64, worker_id: &str, extend_seconds: i64) -> Result<()>;

    async fn complete(&self, queue_id: i64, worker_id: &str) -> Result<()>;

    async fn fail(&self, queue_id: i64, worker_id: &str, message: &str, retryable: bool)
        -> Result<()>;

    /// Re-queues items whose lease has expired without a heartbeat.
    /// Returns the number of items reaped.
    async fn reap_expired(&self) -> Result<u64>;
}

/// Externalized task-result storage (spec.md §4.7).
#[async_trait]
pub trait ResultRefStore: Send + Sync {
    async fn store(
        &self,
        execution_id: i64,
        step: &str,
        task: Option<&str>,
        value: serde_json::Value,
        spec: &noetl_contracts::playbook::ResultSpec,
    ) -> Result<ResultRef>;

    async fn resolve(&self, result_id: i64, page: Option<u32>) -> Result<serde_json::Value>;
}

/// Decrypted credential handed to a `ToolAdapter` at execution time.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub name: String,
    pub secret: serde_json::Value,
    pub token_type: Option<String>,
}

/// Scoped, TTL-bound, envelope-encrypted credential cache (spec.md §4.6).
#[async_trait]
pub trait KeychainStore: Send + Sync {
    async fn get(&self, catalog_id: i64, name: &str) -> Result<Option<ResolvedCredential>>;

    async fn upsert(
        &self,
        catalog_id: i64,
        name: &str,
        credential: serde_json::Value,
        token_type: Option<String>,
        ttl_seconds: Option<i64>,
    ) -> Result<()>;
}

/// A single tool kind's execution logic (spec.md §4.8 "Tool adapters").
/// Implementations must never let a secret leak into `Outcome.result`
/// or `Outcome.error.message` — sanitization happens at the adapter
/// boundary, before the outcome is ever logged or persisted.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn execute(
        &self,
        task: &ToolTask,
        scope: &Scope,
        credential: Option<ResolvedCredential>,
    ) -> Outcome;
}

/// Looks up the `ToolAdapter` registered for a given tool kind.
pub trait ToolRegistry: Send + Sync {
    fn resolve(&self, kind: &noetl_contracts::playbook::ToolKind) -> Option<std::sync::Arc<dyn ToolAdapter>>;
}
