// Queue endpoints (spec.md §6): server-to-worker passthroughs onto
// `QueueStore`. No engine interaction -- the orchestrator only cares
// about the `step.*`/`task.attempt.*` events a worker emits around a
// lease, not the lease bookkeeping itself.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use noetl_contracts::queue::{
    CompleteRequest, FailRequest, HeartbeatRequest, LeaseRequest, LeaseResponse,
};
use noetl_core::traits::QueueStore;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn QueueStore>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/queue/lease", post(lease))
        .route("/api/queue/heartbeat", post(heartbeat))
        .route("/api/queue/complete", post(complete))
        .route("/api/queue/fail", post(fail))
        .with_state(state)
}

#[utoipa::path(
    post,
    path = "/api/queue/lease",
    request_body = LeaseRequest,
    responses((status = 200, description = "Leased items", body = LeaseResponse)),
    tag = "queue"
)]
pub async fn lease(State(state): State<AppState>, Json(req): Json<LeaseRequest>) -> Result<Json<LeaseResponse>, ApiError> {
    let items = state.queue.lease(&req.worker_id, req.max_items, req.lease_seconds).await?;
    Ok(Json(LeaseResponse { items }))
}

#[utoipa::path(
    post,
    path = "/api/queue/heartbeat",
    request_body = HeartbeatRequest,
    responses((status = 200, description = "Lease extended")),
    tag = "queue"
)]
pub async fn heartbeat(State(state): State<AppState>, Json(req): Json<HeartbeatRequest>) -> Result<(), ApiError> {
    state.queue.heartbeat(req.queue_id, &req.worker_id, req.extend_seconds).await?;
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/queue/complete",
    request_body = CompleteRequest,
    responses((status = 200, description = "Item marked complete")),
    tag = "queue"
)]
pub async fn complete(State(state): State<AppState>, Json(req): Json<CompleteRequest>) -> Result<(), ApiError> {
    state.queue.complete(req.queue_id, &req.worker_id).await?;
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/queue/fail",
    request_body = FailRequest,
    responses((status = 200, description = "Item marked failed or re-queued")),
    tag = "queue"
)]
pub async fn fail(State(state): State<AppState>, Json(req): Json<FailRequest>) -> Result<(), ApiError> {
    state.queue.fail(req.queue_id, &req.worker_id, &req.message, req.retryable).await?;
    Ok(())
}
