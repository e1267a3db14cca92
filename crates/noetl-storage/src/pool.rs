// Connection pool bootstrap, mirroring the teacher's `Database::from_url`
// helper and migration-on-startup pattern.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

/// `DATABASE_URL` is the only required setting; pool bootstrap lives
/// here rather than in noetl-api so the CLI and test harnesses can
/// stand up storage the same way the server does.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    connect(&url).await
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run database migrations")
}
