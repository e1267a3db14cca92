// HTTP request/response DTOs for the control-plane API (spec.md §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventStatus;

/// `POST /api/run/playbook`. Either `playbook` (inline YAML) or
/// `catalog_id`/`path` identifies what to run; `workload` seeds the
/// execution's initial context.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlaybookRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub workload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<i64>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlaybookResponse {
    pub execution_id: i64,
    pub catalog_id: i64,
    pub status: EventStatus,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub execution_id: i64,
    pub status: EventStatus,
}

/// `GET /api/execution/{id}` response: the projected workflow state
/// plus the full event history it was folded from, so a caller that
/// wants evidence for the summary (or a UI timeline) doesn't need a
/// separate endpoint.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatusResponse {
    pub execution_id: i64,
    pub catalog_id: i64,
    pub status: EventStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepStateDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: Vec<crate::event::Event>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStateDto {
    pub step: String,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// `GET /api/execution` list query (pagination + status filter).
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListExecutionsQuery {
    #[serde(default)]
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub catalog_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummaryDto {
    pub execution_id: i64,
    pub catalog_id: i64,
    pub status: EventStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListExecutionsResponse {
    pub executions: Vec<ExecutionSummaryDto>,
    pub total: u64,
}

/// `POST /api/events` accepts either a single envelope or a batch.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IngestEventsRequest {
    Single(crate::event::EventEnvelope),
    Batch(Vec<crate::event::EventEnvelope>),
}

impl IngestEventsRequest {
    pub fn into_vec(self) -> Vec<crate::event::EventEnvelope> {
        match self {
            Self::Single(e) => vec![e],
            Self::Batch(es) => es,
        }
    }
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEventsResponse {
    pub event_ids: Vec<i64>,
}

/// `PUT /api/keychain/{catalog_id}/{name}` upsert body.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeychainUpsertRequest {
    pub credential: serde_json::Value,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeychainUpsertResponse {
    pub name: String,
    pub catalog_id: i64,
    pub updated_at: DateTime<Utc>,
}

/// `GET /api/keychain/{catalog_id}/{name}` response. This is a
/// server-to-worker surface (spec.md §4.6) -- the worker process never
/// touches Postgres directly, so this is its only path to a decrypted
/// credential. It is not meant for a public/UI client.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeychainResolveResponse {
    pub name: String,
    pub secret: serde_json::Value,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Generic problem-style error body returned by every handler on
/// failure.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_events_request_accepts_single_and_batch() {
        let single = serde_json::json!({
            "execution_id": 1,
            "event_type": "execution.started",
            "status": "RUNNING"
        });
        let req: IngestEventsRequest = serde_json::from_value(single).unwrap();
        assert_eq!(req.into_vec().len(), 1);

        let batch = serde_json::json!([
            {"execution_id": 1, "event_type": "execution.started", "status": "RUNNING"},
            {"execution_id": 1, "event_type": "execution.completed", "status": "COMPLETED"}
        ]);
        let req: IngestEventsRequest = serde_json::from_value(batch).unwrap();
        assert_eq!(req.into_vec().len(), 2);
    }
}
