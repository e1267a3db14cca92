// `GET /api/result/resolve` (spec.md §4.7, §6): resolves a `ResultRef`
// to its actual payload, paginating through a stored `Manifest` when
// the result was externalized.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use noetl_contracts::result_ref::ResolveQuery;
use noetl_core::traits::ResultRefStore;
use serde_json::Value;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub results: Arc<dyn ResultRefStore>,
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/api/result/resolve", get(resolve)).with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/result/resolve",
    params(
        ("result_id" = i64, Query, description = "Result reference id"),
        ("page" = Option<u32>, Query, description = "Page number for a paginated manifest"),
    ),
    responses(
        (status = 200, description = "Resolved payload"),
        (status = 404, description = "Result not found or page out of range"),
    ),
    tag = "result"
)]
pub async fn resolve(State(state): State<AppState>, Query(q): Query<ResolveQuery>) -> Result<Json<Value>, ApiError> {
    let value = state.results.resolve(q.result_id, q.page).await?;
    Ok(Json(value))
}
