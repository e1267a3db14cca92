// `POST /api/events` (spec.md §6): the single ingest point every event
// producer (orchestrator-internal calls aside) funnels through. Runs
// sanitization, then `Engine::submit_event` so admission/routing react
// immediately rather than on the next poll.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use noetl_contracts::rest::{IngestEventsRequest, IngestEventsResponse};
use noetl_core::traits::EventStore;
use noetl_orchestrator::Engine;

use crate::error::ApiError;
use crate::sanitize::redact_sensitive;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub events: Arc<dyn EventStore>,
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/api/events", post(ingest_events)).with_state(state)
}

#[utoipa::path(
    post,
    path = "/api/events",
    request_body = IngestEventsRequest,
    responses((status = 200, description = "Events accepted", body = IngestEventsResponse)),
    tag = "events"
)]
pub async fn ingest_events(
    State(state): State<AppState>,
    Json(req): Json<IngestEventsRequest>,
) -> Result<Json<IngestEventsResponse>, ApiError> {
    let mut event_ids = Vec::new();
    for mut envelope in req.into_vec() {
        if let Some(ctx) = envelope.context.as_mut() {
            redact_sensitive(ctx);
        }
        if let Some(result) = envelope.result.as_mut() {
            redact_sensitive(result);
        }
        if let Some(meta) = envelope.meta.as_mut() {
            redact_sensitive(meta);
        }

        if envelope.catalog_id == 0 {
            let history = state.events.get_by_execution(envelope.execution_id).await?;
            if let Some(existing) = history.first() {
                envelope.catalog_id = existing.catalog_id;
            }
        }

        let event = state.engine.submit_event(envelope).await?;
        event_ids.push(event.event_id);
    }
    Ok(Json(IngestEventsResponse { event_ids }))
}
