// Execution lifecycle routes: submit a playbook, inspect status, list,
// cancel. Status/listing are read off `WorkflowState::from_events` (spec.md
// §9's crash-recovery fold) rather than the `workflow`/`step_state`
// projection tables that `PgEventStore::append` maintains transactionally --
// the in-process fold avoids a DB round trip for every status read and
// doubles as the engine's own crash-recovery path, so it stays the read
// path here even though the projection tables are now kept in sync too.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use noetl_contracts::event::EventStatus;
use noetl_contracts::playbook::Playbook;
use noetl_contracts::rest::{
    CancelRequest, CancelResponse, ExecutionSummaryDto, ListExecutionsQuery, ListExecutionsResponse,
    RunPlaybookRequest, RunPlaybookResponse, StepStateDto,
};
use noetl_core::snowflake::SnowflakeGenerator;
use noetl_core::state::{StepState, WorkflowState};
use noetl_core::traits::EventStore;
use noetl_orchestrator::Engine;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub events: Arc<dyn EventStore>,
    pub ids: Arc<SnowflakeGenerator>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/run/playbook", post(run_playbook))
        .route("/api/execution", get(list_executions))
        .route("/api/execution/:id", get(get_execution))
        .route("/api/cancel/:id", post(cancel_execution))
        .with_state(state)
}

#[utoipa::path(
    post,
    path = "/api/run/playbook",
    request_body = RunPlaybookRequest,
    responses(
        (status = 200, description = "Execution started", body = RunPlaybookResponse),
        (status = 422, description = "Invalid playbook or request"),
    ),
    tag = "execution"
)]
pub async fn run_playbook(
    State(state): State<AppState>,
    Json(req): Json<RunPlaybookRequest>,
) -> Result<Json<RunPlaybookResponse>, ApiError> {
    let Some(yaml) = req.playbook else {
        return Err(ApiError::not_found(
            "catalog-backed playbook lookup (`path`) is not supported; submit inline `playbook` YAML",
        ));
    };

    let playbook: Playbook =
        Playbook::parse_yaml(&yaml).map_err(|err| ApiError::validation(format!("invalid playbook: {err}")))?;

    let catalog_id = req.catalog_id.unwrap_or_else(|| state.ids.next_id());
    let execution_id = state
        .engine
        .start_execution(catalog_id, Arc::new(playbook), req.workload)
        .await?;

    Ok(Json(RunPlaybookResponse { execution_id, catalog_id, status: EventStatus::Running }))
}

#[utoipa::path(
    get,
    path = "/api/execution/{id}",
    params(("id" = i64, Path, description = "Execution id")),
    responses(
        (status = 200, description = "Execution status", body = noetl_contracts::rest::ExecutionStatusResponse),
        (status = 404, description = "Execution not found"),
    ),
    tag = "execution"
)]
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<noetl_contracts::rest::ExecutionStatusResponse>, ApiError> {
    let events = state.events.get_by_execution(id).await?;
    let wf = WorkflowState::from_events(&events).ok_or_else(|| ApiError::not_found(format!("execution {id} not found")))?;
    Ok(Json(to_status_response(&wf, events)))
}

#[utoipa::path(
    get,
    path = "/api/execution",
    params(
        ("status" = Option<EventStatus>, Query, description = "Filter by status"),
        ("catalog_id" = Option<i64>, Query, description = "Filter by catalog id"),
        ("limit" = Option<u32>, Query, description = "Max number of results (default 50)"),
        ("offset" = Option<u32>, Query, description = "Offset for pagination"),
    ),
    responses((status = 200, description = "Executions", body = ListExecutionsResponse)),
    tag = "execution"
)]
pub async fn list_executions(
    State(state): State<AppState>,
    Query(q): Query<ListExecutionsQuery>,
) -> Result<Json<ListExecutionsResponse>, ApiError> {
    let ids = state.engine.known_execution_ids().await;
    let mut summaries = Vec::new();
    for id in ids {
        let events = state.events.get_by_execution(id).await?;
        let Some(wf) = WorkflowState::from_events(&events) else { continue };
        if let Some(status) = q.status {
            if wf.status != status {
                continue;
            }
        }
        if let Some(catalog_id) = q.catalog_id {
            if wf.catalog_id != catalog_id {
                continue;
            }
        }
        summaries.push(ExecutionSummaryDto {
            execution_id: wf.execution_id,
            catalog_id: wf.catalog_id,
            status: wf.status,
            started_at: wf.started_at.unwrap_or_else(chrono::Utc::now),
            ended_at: wf.ended_at,
        });
    }

    let total = summaries.len() as u64;
    let offset = q.offset.unwrap_or(0) as usize;
    let limit = q.limit.unwrap_or(50) as usize;
    let page = summaries.into_iter().skip(offset).take(limit).collect();

    Ok(Json(ListExecutionsResponse { executions: page, total }))
}

#[utoipa::path(
    post,
    path = "/api/cancel/{id}",
    params(("id" = i64, Path, description = "Execution id")),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Cancellation accepted", body = CancelResponse),
        (status = 404, description = "Execution not found"),
    ),
    tag = "execution"
)]
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let existing = state.events.get_by_execution(id).await?;
    if existing.is_empty() {
        return Err(ApiError::not_found(format!("execution {id} not found")));
    }

    let reason = req.reason.as_deref().unwrap_or("cancelled via API");
    state.engine.cancel_execution(id, reason).await?;

    Ok(Json(CancelResponse { execution_id: id, status: EventStatus::Cancelled }))
}

fn to_status_response(
    state: &WorkflowState,
    events: Vec<noetl_contracts::event::Event>,
) -> noetl_contracts::rest::ExecutionStatusResponse {
    let mut steps: Vec<StepStateDto> = state
        .steps
        .values()
        .map(|s| StepStateDto {
            step: s.name.clone(),
            status: step_status(s.state),
            current_index: s.current_index,
            total: None,
            started_at: s.started_at,
            ended_at: s.ended_at,
        })
        .collect();
    steps.sort_by(|a, b| a.step.cmp(&b.step));

    let error = state.steps.values().find_map(|s| s.error.clone());

    noetl_contracts::rest::ExecutionStatusResponse {
        execution_id: state.execution_id,
        catalog_id: state.catalog_id,
        status: state.status,
        started_at: state.started_at.unwrap_or_else(chrono::Utc::now),
        ended_at: state.ended_at,
        steps,
        error,
        events,
    }
}

fn step_status(state: StepState) -> EventStatus {
    match state {
        StepState::Pending | StepState::Admitted | StepState::Started => EventStatus::Running,
        StepState::Completed => EventStatus::Completed,
        StepState::Failed => EventStatus::Failed,
        StepState::Cancelled => EventStatus::Cancelled,
    }
}
