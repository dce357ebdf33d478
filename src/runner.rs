//! Runner: one task's container + agent-server session state machine

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::agent_server::{translate_event, AgentServerClient, RunnerMessage, SessionId};
use crate::config::Settings;
use crate::container_runtime::{ContainerRuntime, ContainerSpec, ContainerStatus};
use crate::error::{AgentServerError, ContainerError, OrchestratorError};
use crate::metrics::Metrics;
use crate::recovery::RecoveryManager;
use crate::settings_manager::RunnerSettings;
use crate::workspace::{Workspace, WorkspaceManager};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunnerId(pub uuid::Uuid);

impl RunnerId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Pending,
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// The Controller-facing callback contract. Set once at construction and
/// never replaced; invoked from both the Runner's own detached worker
/// (`OnStarted`, `OnError`) and its independently-spawned event pump
/// (`OnEvent`, `OnMessage`) — a slow observer only stalls its own Runner.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_started(&self, runner_id: RunnerId, session_id: SessionId);
    async fn on_event(&self, runner_id: RunnerId, raw_event: serde_json::Value);
    async fn on_message(&self, runner_id: RunnerId, message: RunnerMessage);
    async fn on_complete(&self, runner_id: RunnerId, success: bool, output: String);
    async fn on_error(&self, runner_id: RunnerId, error: String);
}

/// Dependencies a Runner needs beyond its own identity and settings,
/// bundled so the constructor stays within clippy's argument-count
/// limit.
pub struct RunnerDeps {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub client: AgentServerClient,
    pub recovery: Arc<RecoveryManager>,
    pub metrics: Arc<Metrics>,
    pub workspace_manager: Arc<WorkspaceManager>,
    pub settings: Arc<Settings>,
}

pub struct Runner {
    pub id: RunnerId,
    pub task_id: String,
    state: RunnerState,
    container_id: Option<String>,
    host_port: Option<u16>,
    session_id: Option<SessionId>,
    created_at: Instant,
    last_activity: Instant,
    workspace: Option<Workspace>,
    cancellation: CancellationToken,
    accumulated_output: Arc<Mutex<String>>,
    observer: Arc<dyn Observer>,
    /// Set once by the owning registry right after the Runner is
    /// wrapped in `Arc<RwLock<_>>`, so `run()`'s detached worker can
    /// re-acquire the Runner without `run()` itself holding a borrow.
    self_handle: Option<std::sync::Weak<RwLock<Runner>>>,

    runtime: Arc<dyn ContainerRuntime>,
    client: AgentServerClient,
    recovery: Arc<RecoveryManager>,
    metrics: Arc<Metrics>,
    workspace_manager: Arc<WorkspaceManager>,
    settings: Arc<Settings>,
    runner_settings: RunnerSettings,
}

impl Runner {
    #[must_use]
    pub fn new(
        task_id: String,
        runner_settings: RunnerSettings,
        observer: Arc<dyn Observer>,
        deps: RunnerDeps,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: RunnerId::new(),
            task_id,
            state: RunnerState::Pending,
            container_id: None,
            host_port: None,
            session_id: None,
            created_at: now,
            last_activity: now,
            workspace: None,
            cancellation: CancellationToken::new(),
            accumulated_output: Arc::new(Mutex::new(String::new())),
            observer,
            self_handle: None,
            runtime: deps.runtime,
            client: deps.client,
            recovery: deps.recovery,
            metrics: deps.metrics,
            workspace_manager: deps.workspace_manager,
            settings: deps.settings,
            runner_settings,
        }
    }

    /// Wire the Runner to its own `Arc<RwLock<_>>` handle, once the
    /// registry has that handle in hand. Must be called before `run()`.
    pub fn set_self_handle(&mut self, handle: std::sync::Weak<RwLock<Runner>>) {
        self.self_handle = Some(handle);
    }

    #[must_use]
    pub const fn state(&self) -> RunnerState {
        self.state
    }

    #[must_use]
    pub fn is_idle_since(&self, now: Instant, idle_timeout: Duration) -> bool {
        matches!(self.state, RunnerState::Ready) && now.duration_since(self.last_activity) > idle_timeout
    }

    #[must_use]
    pub fn is_over_age(&self, now: Instant, max_runtime: Duration) -> bool {
        now.duration_since(self.created_at) > max_runtime
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Provision the container, wait for the agent-server inside it to
    /// become healthy, open a session, and start the event pump that
    /// will run for the Runner's whole lifetime.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be prepared, the
    /// container cannot be created/started, the health check never
    /// succeeds within the retry budget, or the session cannot be
    /// opened.
    #[instrument(skip(self), fields(runner_id = %self.id, task_id = %self.task_id))]
    pub async fn start(&mut self) -> Result<(), OrchestratorError> {
        self.state = RunnerState::Starting;

        let workspace = self
            .workspace_manager
            .prepare(&self.task_id, &self.runner_settings)
            .await?;

        let mut labels = HashMap::new();
        labels.insert("runnerd.task_id".to_string(), self.task_id.clone());
        labels.insert("runnerd.runner_id".to_string(), self.id.to_string());

        let spec = ContainerSpec {
            name: format!("runner-{}", self.task_id),
            image: self.settings.runner_image.clone(),
            container_port: self.settings.runner_agent_server_port,
            env: vec![],
            labels,
            binds: vec![format!(
                "{}:/workspace",
                workspace.root.to_string_lossy()
            )],
            memory_limit_bytes: None,
        };

        let start = Instant::now();
        let container_id = self
            .recovery
            .retry(
                &self.metrics,
                ContainerError::classify,
                || async {
                    let spec = spec.clone();
                    self.runtime.create_container(spec).await
                },
            )
            .await
            .inspect_err(|_| self.metrics.record_container_failed())?;
        self.metrics.record_container_created();

        self.runtime.start_container(&container_id).await?;
        self.metrics.record_container_started();
        self.container_id = Some(container_id.clone());
        self.workspace = Some(workspace);

        let status = self.wait_for_ready(&container_id).await?;
        self.host_port = status.host_port;
        self.metrics.record_container_start_ms(start.elapsed());

        let session = self.client.create_session(&self.runner_settings).await?;
        self.session_id = Some(session.clone());

        self.observer.on_started(self.id, session.clone()).await;

        self.spawn_event_pump(session);
        tokio::time::sleep(Duration::from_millis(500)).await;

        self.state = RunnerState::Ready;
        self.touch();
        info!(runner_id = %self.id, "runner ready");
        Ok(())
    }

    fn spawn_event_pump(&self, session: SessionId) {
        let runner_id = self.id;
        let client = self.client.clone();
        let cancellation = self.cancellation.clone();
        let observer = Arc::clone(&self.observer);
        let accumulated_output = Arc::clone(&self.accumulated_output);
        tokio::spawn(pump_events(
            runner_id,
            client,
            session,
            cancellation,
            observer,
            accumulated_output,
        ));
    }

    async fn wait_for_ready(
        &self,
        container_id: &str,
    ) -> Result<ContainerStatus, OrchestratorError> {
        let status = self
            .recovery
            .retry(
                &self.metrics,
                ContainerError::classify,
                || self.runtime.inspect_container(container_id),
            )
            .await?;

        self.recovery
            .retry(&self.metrics, AgentServerError::classify, || {
                self.client.health()
            })
            .await?;

        Ok(status)
    }

    /// Send the initial prompt and return immediately; the event pump
    /// started in `start()` delivers all subsequent progress. Flips
    /// back to `Ready` once the send completes, win or lose.
    ///
    /// # Errors
    ///
    /// Returns an error if the Runner is not `Ready`.
    #[instrument(skip(self, initial_prompt), fields(runner_id = %self.id))]
    pub fn run(&mut self, initial_prompt: &str) -> Result<(), OrchestratorError> {
        if self.state != RunnerState::Ready {
            return Err(OrchestratorError::RunnerNotReady(self.id));
        }
        let Some(session) = self.session_id.clone() else {
            return Err(OrchestratorError::RunnerNotReady(self.id));
        };

        self.state = RunnerState::Running;
        self.metrics.record_task_executed();
        self.touch();

        let (provider_id, model_id) = split_model(&self.runner_settings.model);
        let client = self.client.clone();
        let observer = Arc::clone(&self.observer);
        let runner_id = self.id;
        let initial_prompt = initial_prompt.to_string();
        let Some(self_handle) = self.self_handle.clone() else {
            return Err(OrchestratorError::RunnerNotReady(self.id));
        };

        tokio::spawn(async move {
            let result = client
                .send_message(&session, &provider_id, &model_id, &initial_prompt)
                .await;

            if let Some(handle) = self_handle.upgrade() {
                let mut runner = handle.write().await;
                if runner.state == RunnerState::Running {
                    runner.state = RunnerState::Ready;
                }
            }

            if let Err(e) = result {
                observer.on_error(runner_id, e.to_string()).await;
            }
        });

        Ok(())
    }

    /// Stop the Runner: snapshot whether it was doing useful work, tear
    /// everything down best-effort, then — only if it was — notify the
    /// observer of a clean completion.
    ///
    /// Teardown never fails loudly: a session close or container
    /// removal failure is logged and the Runner still reaches
    /// `Stopped`.
    #[instrument(skip(self), fields(runner_id = %self.id))]
    pub async fn stop(&mut self) {
        let should_complete = matches!(self.state, RunnerState::Ready | RunnerState::Running);

        self.state = RunnerState::Stopping;
        self.cancellation.cancel();

        if let Some(session) = self.session_id.take() {
            let close = tokio::time::timeout(
                self.settings.shutdown_timeout(),
                self.client.close_session(&session),
            )
            .await;
            match close {
                Ok(Err(e)) => warn!(runner_id = %self.id, error = %e, "session close failed"),
                Err(_) => warn!(runner_id = %self.id, "graceful session close timed out"),
                Ok(Ok(())) => {}
            }
        }

        if let Some(container_id) = self.container_id.take() {
            if let Err(e) = self
                .runtime
                .stop_container(&container_id, self.settings.shutdown_timeout())
                .await
            {
                warn!(runner_id = %self.id, error = %e, "container stop failed");
            }
            if let Err(e) = self.runtime.remove_container(&container_id).await {
                warn!(runner_id = %self.id, error = %e, "container remove failed");
            } else {
                self.metrics.record_container_stopped();
            }
        }

        if let Some(workspace) = self.workspace.take() {
            self.workspace_manager.teardown(&workspace).await;
        }

        self.state = RunnerState::Stopped;
        info!(runner_id = %self.id, "runner stopped");

        if should_complete {
            let output = self.accumulated_output.lock().await.clone();
            self.metrics.record_task_succeeded();
            self.observer.on_complete(self.id, true, output).await;
        }
    }
}

/// Split a `"provider/model"` string into its parts, defaulting the
/// provider to `opencode` when the string carries no slash.
fn split_model(model: &str) -> (String, String) {
    model.split_once('/').map_or_else(
        || ("opencode".to_string(), model.to_string()),
        |(provider, model)| (provider.to_string(), model.to_string()),
    )
}

/// Runs from `start()` until cancellation, stream end, or a transport
/// error. Decoupled from `&Runner` so it can outlive any single `run()`
/// call: every SSE frame reaches `observer.on_event` unconditionally,
/// and the subset that translates reaches `observer.on_message` one
/// frame at a time, with its accumulable text appended to
/// `accumulated_output` before the observer is notified.
async fn pump_events(
    runner_id: RunnerId,
    client: AgentServerClient,
    session: SessionId,
    cancellation: CancellationToken,
    observer: Arc<dyn Observer>,
    accumulated_output: Arc<Mutex<String>>,
) {
    use futures_util::StreamExt;

    let mut stream = Box::pin(client.events(&session));

    loop {
        tokio::select! {
            () = cancellation.cancelled() => {
                info!(runner_id = %runner_id, "event pump cancelled");
                return;
            }
            next = stream.next() => {
                let Some(frame) = next else {
                    info!(runner_id = %runner_id, "event stream closed");
                    return;
                };
                let event = match frame {
                    Ok(event) => event,
                    Err(e) => {
                        error!(runner_id = %runner_id, error = %e, "event stream error");
                        return;
                    }
                };

                observer.on_event(runner_id, event.raw.clone()).await;

                if let Some(message) = translate_event(&event) {
                    if let Some(text) = message.accumulable_text() {
                        accumulated_output.lock().await.push_str(text);
                    }
                    observer.on_message(runner_id, message).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRuntime;

    #[async_trait]
    impl ContainerRuntime for NullRuntime {
        async fn create_container(
            &self,
            _spec: ContainerSpec,
        ) -> Result<String, ContainerError> {
            Ok("null-container".to_string())
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
        async fn on_started(&self, _runner_id: RunnerId, _session_id: SessionId) {}
        async fn on_event(&self, _runner_id: RunnerId, _raw_event: serde_json::Value) {}
        async fn on_message(&self, _runner_id: RunnerId, _message: RunnerMessage) {}
        async fn on_complete(&self, _runner_id: RunnerId, _success: bool, _output: String) {}
        async fn on_error(&self, _runner_id: RunnerId, _error: String) {}
    }

    fn test_runner(settings: Arc<Settings>) -> Runner {
        let metrics = Arc::new(Metrics::new());
        let recovery = Arc::new(RecoveryManager::new((&*settings).into()));
        let workspace_manager = Arc::new(WorkspaceManager::new("/tmp/runnerd-tests"));
        let client = AgentServerClient::new("http://localhost:1", Duration::from_secs(1));
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(NullRuntime);

        Runner::new(
            "task-idle".to_string(),
            RunnerSettings::default(),
            Arc::new(NullObserver),
            RunnerDeps {
                runtime,
                client,
                recovery,
                metrics,
                workspace_manager,
                settings,
            },
        )
    }

    #[test]
    fn idle_detection_respects_state_and_timeout() {
        let settings = Arc::new(Settings::default());
        let mut runner = test_runner(settings);

        assert!(!runner.is_idle_since(Instant::now(), Duration::from_secs(0)));
        runner.state = RunnerState::Ready;
        assert!(runner.is_idle_since(
            Instant::now() + Duration::from_secs(5),
            Duration::from_secs(1)
        ));
    }

    #[test]
    fn running_runner_is_never_considered_idle() {
        let settings = Arc::new(Settings::default());
        let mut runner = test_runner(settings);
        runner.state = RunnerState::Running;
        assert!(!runner.is_idle_since(
            Instant::now() + Duration::from_secs(9_000),
            Duration::from_secs(1)
        ));
    }

    #[test]
    fn model_string_without_slash_defaults_to_opencode_provider() {
        assert_eq!(
            split_model("claude-3"),
            ("opencode".to_string(), "claude-3".to_string())
        );
    }

    #[test]
    fn model_string_with_slash_splits_provider_and_model() {
        assert_eq!(
            split_model("anthropic/claude-3"),
            ("anthropic".to_string(), "claude-3".to_string())
        );
    }

    #[tokio::test]
    async fn stop_before_start_does_not_panic() {
        let settings = Arc::new(Settings::default());
        let mut runner = test_runner(settings);
        runner.stop().await;
        assert_eq!(runner.state(), RunnerState::Stopped);
    }
}
