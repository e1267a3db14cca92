// `GET`/`PUT /api/keychain/{catalog_id}/{name}` (spec.md §4.6, §6). GET
// is the worker's only path to a decrypted credential since it never
// touches Postgres directly; PUT upserts one, encrypted at rest by
// `PgKeychainStore`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use noetl_contracts::rest::{KeychainResolveResponse, KeychainUpsertRequest, KeychainUpsertResponse};
use noetl_core::traits::KeychainStore;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub keychain: Arc<dyn KeychainStore>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/keychain/:catalog_id/:name", get(resolve).put(upsert))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/keychain/{catalog_id}/{name}",
    params(
        ("catalog_id" = i64, Path, description = "Catalog id"),
        ("name" = String, Path, description = "Credential name"),
    ),
    responses(
        (status = 200, description = "Resolved credential", body = KeychainResolveResponse),
        (status = 404, description = "No credential cached under this name"),
    ),
    tag = "keychain"
)]
pub async fn resolve(
    State(state): State<AppState>,
    Path((catalog_id, name)): Path<(i64, String)>,
) -> Result<Json<KeychainResolveResponse>, ApiError> {
    let resolved = state
        .keychain
        .get(catalog_id, &name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no cached credential '{name}' for catalog {catalog_id}")))?;

    Ok(Json(KeychainResolveResponse {
        name: resolved.name,
        secret: resolved.secret,
        token_type: resolved.token_type,
    }))
}

#[utoipa::path(
    put,
    path = "/api/keychain/{catalog_id}/{name}",
    params(
        ("catalog_id" = i64, Path, description = "Catalog id"),
        ("name" = String, Path, description = "Credential name"),
    ),
    request_body = KeychainUpsertRequest,
    responses((status = 200, description = "Credential stored", body = KeychainUpsertResponse)),
    tag = "keychain"
)]
pub async fn upsert(
    State(state): State<AppState>,
    Path((catalog_id, name)): Path<(i64, String)>,
    Json(req): Json<KeychainUpsertRequest>,
) -> Result<Json<KeychainUpsertResponse>, ApiError> {
    state
        .keychain
        .upsert(catalog_id, &name, req.credential, req.token_type, req.ttl_seconds)
        .await?;

    Ok(Json(KeychainUpsertResponse { name, catalog_id, updated_at: chrono::Utc::now() }))
}
