use std::sync::Arc;

use noetl_tools::BuiltinToolRegistry;
use noetl_worker::config::WorkerConfig;
use noetl_worker::runner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = WorkerConfig::from_env();
    let registry: Arc<dyn noetl_core::traits::ToolRegistry> = Arc::new(BuiltinToolRegistry::with_builtins());

    runner::run(config, registry).await
}
