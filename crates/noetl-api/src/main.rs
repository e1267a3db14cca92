// noetl-api server: the single REST surface described in spec.md §6,
// backed by Postgres storage and the storage-agnostic orchestrator
// engine.

mod error;
mod events;
mod execution;
mod keychain;
mod queue;
mod result;
mod sanitize;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use noetl_orchestrator::Engine;
use noetl_storage::{connect_from_env, run_migrations, EncryptionService, PgEventStore, PgKeychainStore, PgQueueStore, PgResultRefStore};
use noetl_core::snowflake::SnowflakeGenerator;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        execution::run_playbook,
        execution::get_execution,
        execution::list_executions,
        execution::cancel_execution,
        events::ingest_events,
        queue::lease,
        queue::heartbeat,
        queue::complete,
        queue::fail,
        keychain::resolve,
        keychain::upsert,
        result::resolve,
    ),
    components(schemas(
        noetl_contracts::rest::RunPlaybookRequest,
        noetl_contracts::rest::RunPlaybookResponse,
        noetl_contracts::rest::ExecutionStatusResponse,
        noetl_contracts::rest::ListExecutionsResponse,
        noetl_contracts::rest::ExecutionSummaryDto,
        noetl_contracts::rest::StepStateDto,
        noetl_contracts::event::Event,
        noetl_contracts::event::EventType,
        noetl_contracts::event::EventStatus,
        noetl_contracts::rest::CancelRequest,
        noetl_contracts::rest::CancelResponse,
        noetl_contracts::rest::IngestEventsRequest,
        noetl_contracts::rest::IngestEventsResponse,
        noetl_contracts::rest::KeychainResolveResponse,
        noetl_contracts::rest::KeychainUpsertRequest,
        noetl_contracts::rest::KeychainUpsertResponse,
        noetl_contracts::queue::LeaseRequest,
        noetl_contracts::queue::LeaseResponse,
        noetl_contracts::queue::HeartbeatRequest,
        noetl_contracts::queue::CompleteRequest,
        noetl_contracts::queue::FailRequest,
    )),
    tags(
        (name = "execution", description = "Playbook submission and execution lifecycle"),
        (name = "events", description = "Event ingest"),
        (name = "queue", description = "Durable queue lease/heartbeat/complete/fail"),
        (name = "keychain", description = "Credential resolution and storage"),
        (name = "result", description = "Externalized result resolution"),
    ),
    info(
        title = "NoETL API",
        version = "0.1.0",
        description = "Event-sourced workflow orchestrator REST surface",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "noetl_api=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("noetl-api starting...");

    let pool = connect_from_env().await.context("failed to connect to database")?;
    run_migrations(&pool).await.context("failed to run migrations")?;
    tracing::info!("connected to database, migrations applied");

    let ids = Arc::new(SnowflakeGenerator::from_env());
    let events: Arc<dyn noetl_core::traits::EventStore> = Arc::new(PgEventStore::new(pool.clone(), ids.clone()));
    let queue: Arc<dyn noetl_core::traits::QueueStore> = Arc::new(PgQueueStore::new(pool.clone(), ids.clone()));
    let results: Arc<dyn noetl_core::traits::ResultRefStore> = Arc::new(PgResultRefStore::new(pool.clone(), ids.clone()));

    let encryption = EncryptionService::from_env().context(
        "NOETL_ENCRYPTION_KEY not set; the keychain cannot start without a primary envelope key",
    )?;
    let keychain: Arc<dyn noetl_core::traits::KeychainStore> = Arc::new(PgKeychainStore::new(pool.clone(), encryption));

    let engine = Arc::new(Engine::new(events.clone(), queue.clone(), keychain.clone(), ids.clone()));

    let execution_state = execution::AppState { engine: engine.clone(), events: events.clone(), ids: ids.clone() };
    let events_state = events::AppState { engine: engine.clone(), events: events.clone() };
    let queue_state = queue::AppState { queue: queue.clone() };
    let keychain_state = keychain::AppState { keychain: keychain.clone() };
    let result_state = result::AppState { results: results.clone() };

    let app = Router::new()
        .route("/health", get(health))
        .merge(execution::routes(execution_state))
        .merge(events::routes(events_state))
        .merge(queue::routes(queue_state))
        .merge(keychain::routes(keychain_state))
        .merge(result::routes(result_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = std::env::var("NOETL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind to address")?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
