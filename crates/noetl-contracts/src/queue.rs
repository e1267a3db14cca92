// Durable work-queue DTOs (spec.md §3 "QueueItem", §4.2 lease lifecycle).
//
// `queued -> leased -> {done, dead}`. The orchestrator enqueues a
// `QueueItem` per admitted loop iteration (or a single item for a
// non-looping step); the worker leases, heartbeats and completes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Leased,
    Done,
    Dead,
}

/// The payload a worker receives on lease: everything it needs to run
/// a step's task pipeline without a further round trip, except for
/// credentials (fetched separately from the keychain on demand).
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePayload {
    pub execution_id: i64,
    pub catalog_id: i64,
    pub step: String,
    /// Server-authoritative snapshot of `step.tool`, templates already
    /// resolved against the bound scopes. Workers consume this directly
    /// and never re-render (spec.md §4.3.2).
    pub rendered_pipeline: serde_json::Value,
    /// Immutable `args.*` bound from the admitting arc's inscription.
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterator_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iter_value: Option<serde_json::Value>,
    pub ctx: serde_json::Value,
    #[serde(default)]
    pub attempt: i32,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub queue_id: i64,
    pub execution_id: i64,
    pub catalog_id: i64,
    pub step: String,
    pub status: QueueStatus,
    pub payload: QueuePayload,
    pub priority: i32,
    pub attempts: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `POST /api/queue/lease` request: a worker asks for up to `max_items`
/// items, identifying itself so the lease can be reaped if it dies.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub worker_id: String,
    #[serde(default = "default_max_items")]
    pub max_items: u32,
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,
}

fn default_max_items() -> u32 {
    1
}

fn default_lease_seconds() -> i64 {
    60
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LeaseResponse {
    pub items: Vec<QueueItem>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub queue_id: i64,
    pub worker_id: String,
    #[serde(default = "default_lease_seconds")]
    pub extend_seconds: i64,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub queue_id: i64,
    pub worker_id: String,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailRequest {
    pub queue_id: i64,
    pub worker_id: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_request_defaults_are_one_item_sixty_seconds() {
        let json = serde_json::json!({"worker_id": "w-1"});
        let req: LeaseRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.max_items, 1);
        assert_eq!(req.lease_seconds, 60);
    }
}
