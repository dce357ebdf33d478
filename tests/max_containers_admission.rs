//! End-to-end: the Runner Manager never admits more than
//! `max_containers` concurrently non-terminal runners.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use runnerd::agent_server::{RunnerMessage, SessionId};
use runnerd::config::Settings;
use runnerd::container_runtime::{ContainerRuntime, ContainerSpec, ContainerStatus};
use runnerd::error::{ContainerError, OrchestratorError};
use runnerd::runner::{Observer, RunnerId};
use runnerd::runner_manager::RunnerManager;
use runnerd::settings_manager::RunnerSettings;

struct StallingRuntime;

#[async_trait]
impl ContainerRuntime for StallingRuntime {
    async fn create_container(&self, _spec: ContainerSpec) -> Result<String, ContainerError> {
        // Never resolves before the test asserts, so the runner stays
        // Pending/Starting and keeps occupying a concurrency slot.
        std::future::pending::<()>().await;
        unreachable!()
    }
    async fn start_container(&self, _id: &str) -> Result<(), ContainerError> {
        Ok(())
    }
    async fn stop_container(&self, _id: &str, _timeout: Duration) -> Result<(), ContainerError> {
        Ok(())
    }
    async fn remove_container(&self, _id: &str) -> Result<(), ContainerError> {
        Ok(())
    }
    async fn inspect_container(&self, _id: &str) -> Result<ContainerStatus, ContainerError> {
        Ok(ContainerStatus {
            running: true,
            host_port: None,
        })
    }
    async fn container_logs(&self, _id: &str) -> Result<String, ContainerError> {
        Ok(String::new())
    }
    async fn ping(&self) -> Result<(), ContainerError> {
        Ok(())
    }
}

struct NoopObserver;

#[async_trait]
impl Observer for NoopObserver {
    async fn on_started(&self, _runner_id: RunnerId, _session_id: SessionId) {}
    async fn on_event(&self, _runner_id: RunnerId, _raw_event: serde_json::Value) {}
    async fn on_message(&self, _runner_id: RunnerId, _message: RunnerMessage) {}
    async fn on_complete(&self, _runner_id: RunnerId, _success: bool, _output: String) {}
    async fn on_error(&self, _runner_id: RunnerId, _error: String) {}
}

#[tokio::test]
async fn rejects_task_once_cap_is_reached() {
    let mut settings = Settings::default();
    settings.max_containers = 1;
    settings.runner_workspace_dir = std::env::temp_dir()
        .join(format!("runnerd-admission-{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(StallingRuntime);
    let manager = Arc::new(RunnerManager::new(settings, runtime));
    let observer: Arc<dyn Observer> = Arc::new(NoopObserver);

    let first = manager
        .start_task(
            "task-a".to_string(),
            RunnerSettings::default(),
            observer.clone(),
            "hello".to_string(),
        )
        .await;
    assert!(first.is_ok());

    let second = manager
        .start_task(
            "task-b".to_string(),
            RunnerSettings::default(),
            observer,
            "hello".to_string(),
        )
        .await;

    assert!(matches!(
        second,
        Err(OrchestratorError::MaxContainersReached(1))
    ));
}
