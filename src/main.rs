use std::sync::Arc;
use tracing_subscriber::{prelude::*, EnvFilter};

use runnerd::agent_server::{RunnerMessage, SessionId};
use runnerd::config::Settings;
use runnerd::container_runtime::{BollardRuntime, ContainerRuntime};
use runnerd::runner::{Observer, RunnerId};
use runnerd::runner_manager::RunnerManager;

struct LoggingObserver;

#[async_trait::async_trait]
impl Observer for LoggingObserver {
    async fn on_started(&self, runner_id: RunnerId, session_id: SessionId) {
        tracing::info!(%runner_id, %session_id, "started");
    }
    async fn on_event(&self, runner_id: RunnerId, raw_event: serde_json::Value) {
        tracing::debug!(%runner_id, %raw_event, "event");
    }
    async fn on_message(&self, runner_id: RunnerId, message: RunnerMessage) {
        tracing::info!(%runner_id, message = ?message, "message");
    }
    async fn on_complete(&self, runner_id: RunnerId, success: bool, output: String) {
        tracing::info!(%runner_id, success, output, "complete");
    }
    async fn on_error(&self, runner_id: RunnerId, error: String) {
        tracing::error!(%runner_id, error, "error");
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let settings = Settings::load()?;
    let runtime = Arc::new(BollardRuntime::connect(settings.docker_host.as_deref())?);
    runtime.ping().await?;

    let manager = Arc::new(RunnerManager::new(settings, runtime));
    let _sweep_handle = manager.clone().spawn_lifecycle_sweep();

    tracing::info!("runnerd control plane ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
