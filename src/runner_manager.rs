//! Runner Manager
//!
//! Owns the idempotent `task_id -> Runner` registry (the single entry
//! point a Controller calls) and delegates admission control and
//! idle/age eviction to the Lifecycle Manager, whose sweep results are
//! mapped back from `RunnerId` to `task_id` through a reverse index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::agent_server::AgentServerClient;
use crate::config::Settings;
use crate::container_runtime::ContainerRuntime;
use crate::error::OrchestratorError;
use crate::lifecycle::LifecycleManager;
use crate::metrics::Metrics;
use crate::recovery::RecoveryManager;
use crate::runner::{Observer, Runner, RunnerDeps, RunnerId, RunnerState};
use crate::settings_manager::{RunnerSettings, SettingsManager};
use crate::workspace::WorkspaceManager;

#[derive(Debug, Clone)]
pub struct RunnerSummary {
    pub id: RunnerId,
    pub task_id: String,
    pub state: RunnerState,
}

pub struct RunnerManager {
    runners: RwLock<HashMap<String, Arc<RwLock<Runner>>>>,
    task_ids_by_runner: RwLock<HashMap<RunnerId, String>>,
    lifecycle: Arc<LifecycleManager>,
    settings: Arc<Settings>,
    runtime: Arc<dyn ContainerRuntime>,
    recovery: Arc<RecoveryManager>,
    metrics: Arc<Metrics>,
    workspace_manager: Arc<WorkspaceManager>,
    settings_manager: SettingsManager,
}

impl RunnerManager {
    #[must_use]
    pub fn new(settings: Settings, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let settings = Arc::new(settings);
        let metrics = Arc::new(Metrics::new());
        let recovery = Arc::new(RecoveryManager::new((&*settings).into()));
        let workspace_manager = Arc::new(WorkspaceManager::new(settings.runner_workspace_dir.clone()));
        let lifecycle = Arc::new(LifecycleManager::new(
            settings.max_containers,
            settings.idle_timeout(),
            settings.max_runtime(),
        ));
        Self {
            runners: RwLock::new(HashMap::new()),
            task_ids_by_runner: RwLock::new(HashMap::new()),
            lifecycle,
            settings,
            runtime,
            recovery,
            metrics,
            workspace_manager,
            settings_manager: SettingsManager::new(),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    #[must_use]
    pub fn lifecycle(&self) -> Arc<LifecycleManager> {
        self.lifecycle.clone()
    }

    /// Create (idempotently) and start a Runner for `task_id`, then run
    /// `initial_prompt` on it, detached from the caller. If `task_id`
    /// already has a Runner, its existing `RunnerId` is returned and no
    /// new container is provisioned.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::MaxContainersReached` if admitting a
    /// new task would exceed the configured concurrency cap, or any
    /// error from building the task's `RunnerSettings`.
    #[instrument(skip(self, base_settings, observer))]
    pub async fn start_task(
        &self,
        task_id: String,
        base_settings: RunnerSettings,
        observer: Arc<dyn Observer>,
        initial_prompt: String,
    ) -> Result<RunnerId, OrchestratorError> {
        if let Some(handle) = self.runners.read().await.get(&task_id) {
            return Ok(handle.read().await.id);
        }

        let runner_settings = self.settings_manager.build(base_settings)?;
        let client = AgentServerClient::new(
            format!("http://127.0.0.1:{}", self.settings.runner_agent_server_port),
            self.settings.shutdown_timeout(),
        );
        let deps = RunnerDeps {
            runtime: self.runtime.clone(),
            client,
            recovery: self.recovery.clone(),
            metrics: self.metrics.clone(),
            workspace_manager: self.workspace_manager.clone(),
            settings: self.settings.clone(),
        };
        let runner = Runner::new(task_id.clone(), runner_settings, observer.clone(), deps);
        let runner_id = runner.id;

        let mut runners = self.runners.write().await;
        if let Some(handle) = runners.get(&task_id) {
            return Ok(handle.read().await.id);
        }

        self.lifecycle.register(runner_id).await?;

        let handle = Arc::new(RwLock::new(runner));
        handle.write().await.set_self_handle(Arc::downgrade(&handle));
        runners.insert(task_id.clone(), handle.clone());
        self.task_ids_by_runner
            .write()
            .await
            .insert(runner_id, task_id.clone());
        drop(runners);

        let lifecycle = self.lifecycle.clone();
        tokio::spawn(async move {
            {
                let mut runner = handle.write().await;
                if let Err(e) = runner.start().await {
                    warn!(runner_id = %runner_id, error = %e, "runner failed to start");
                    observer.on_error(runner_id, e.to_string()).await;
                    let _ = lifecycle.unregister(runner_id).await;
                    return;
                }
            }
            let mut runner = handle.write().await;
            if let Err(e) = runner.run(&initial_prompt) {
                warn!(runner_id = %runner_id, error = %e, "runner failed to run");
            }
        });

        Ok(runner_id)
    }

    #[must_use]
    pub async fn get_runner(&self, task_id: &str) -> Option<Arc<RwLock<Runner>>> {
        let runners = self.runners.read().await;
        runners.get(task_id).cloned()
    }

    /// Request a graceful stop of the Runner backing `task_id`.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::TaskNotFound` if no such task is
    /// registered.
    pub async fn stop_task(&self, task_id: &str) -> Result<(), OrchestratorError> {
        let handle = self
            .get_runner(task_id)
            .await
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        let runner_id = handle.read().await.id;

        {
            let mut runner = handle.write().await;
            runner.stop().await;
        }

        let _ = self.lifecycle.unregister(runner_id).await;
        self.runners.write().await.remove(task_id);
        self.task_ids_by_runner.write().await.remove(&runner_id);
        Ok(())
    }

    pub async fn list_runners(&self) -> Vec<RunnerSummary> {
        let runners = self.runners.read().await;
        let mut summaries = Vec::with_capacity(runners.len());
        for runner in runners.values() {
            let runner = runner.read().await;
            summaries.push(RunnerSummary {
                id: runner.id,
                task_id: runner.task_id.clone(),
                state: runner.state(),
            });
        }
        summaries
    }

    /// One Lifecycle Manager sweep: stop every runner the Lifecycle
    /// Manager flags as idle (only `Ready` runners are candidates) or
    /// over age (any state).
    #[instrument(skip(self))]
    pub async fn sweep(&self) {
        let ready_ids: HashSet<RunnerId> = {
            let runners = self.runners.read().await;
            let mut ids = HashSet::new();
            for runner in runners.values() {
                let runner = runner.read().await;
                if runner.state() == RunnerState::Ready {
                    ids.insert(runner.id);
                }
            }
            ids
        };

        let candidates = self.lifecycle.sweep(&ready_ids).await;
        if candidates.is_empty() {
            return;
        }

        let task_ids = self.task_ids_by_runner.read().await;
        let to_stop: Vec<String> = candidates
            .iter()
            .filter_map(|(runner_id, _reason)| task_ids.get(runner_id).cloned())
            .collect();
        drop(task_ids);

        for task_id in to_stop {
            info!(task_id = %task_id, "lifecycle sweep reclaiming runner");
            if let Err(e) = self.stop_task(&task_id).await {
                warn!(task_id = %task_id, error = %e, "lifecycle sweep failed to stop runner");
            }
        }
    }

    /// Spawn the periodic background sweep. The returned handle can be
    /// aborted to stop the Lifecycle Manager.
    pub fn spawn_lifecycle_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.settings.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container_runtime::{ContainerSpec, ContainerStatus};
    use crate::error::ContainerError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullRuntime;

    #[async_trait]
    impl ContainerRuntime for NullRuntime {
        async fn create_container(&self, _spec: ContainerSpec) -> Result<String, ContainerError> {
            Ok("null".to_string())
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
                host_port: Some(4096),
            })
        }
        async fn container_logs(&self, _id: &str) -> Result<String, ContainerError> {
            Ok(String::new())
        }
        async fn ping(&self) -> Result<(), ContainerError> {
            Ok(())
        }
    }

    struct NullObserver;

    #[async_trait]
    impl Observer for NullObserver {
        async fn on_started(&self, _runner_id: RunnerId, _session_id: crate::agent_server::SessionId) {}
        async fn on_event(&self, _runner_id: RunnerId, _raw_event: serde_json::Value) {}
        async fn on_message(&self, _runner_id: RunnerId, _message: crate::agent_server::RunnerMessage) {}
        async fn on_complete(&self, _runner_id: RunnerId, _success: bool, _output: String) {}
        async fn on_error(&self, _runner_id: RunnerId, _error: String) {}
    }

    fn test_manager(max_containers: usize) -> RunnerManager {
        let mut settings = Settings::default();
        settings.max_containers = max_containers;
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(NullRuntime);
        RunnerManager::new(settings, runtime)
    }

    #[tokio::test]
    async fn list_runners_is_empty_initially() {
        let manager = test_manager(5);
        assert!(manager.list_runners().await.is_empty());
    }

    #[tokio::test]
    async fn stop_task_reports_not_found_for_unknown_task() {
        let manager = test_manager(5);
        let result = manager.stop_task("no-such-task").await;
        assert!(matches!(result, Err(OrchestratorError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn start_task_is_idempotent_for_the_same_task_id() {
        let manager = test_manager(5);
        let observer: Arc<dyn Observer> = Arc::new(NullObserver);

        let first = manager
            .start_task(
                "task-a".to_string(),
                RunnerSettings::default(),
                observer.clone(),
                "hello".to_string(),
            )
            .await
            .expect("first start should succeed");

        let second = manager
            .start_task(
                "task-a".to_string(),
                RunnerSettings::default(),
                observer,
                "hello again".to_string(),
            )
            .await
            .expect("second start should return the existing runner");

        assert_eq!(first, second);
        assert_eq!(manager.list_runners().await.len(), 1);
    }
}
