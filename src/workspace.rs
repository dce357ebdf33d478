//! Per-task workspace directories
//!
//! Creates and tears down the host directory tree a Runner's container
//! bind-mounts: a project directory, an `.opencode` directory holding
//! the resolved `RunnerSettings` document, and a logs directory.

use std::path::{Path, PathBuf};
use tracing::{instrument, warn};

use crate::settings_manager::RunnerSettings;

#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub project_dir: PathBuf,
    pub opencode_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl Workspace {
    fn for_task(workspace_dir: &str, task_id: &str) -> Self {
        let root = Path::new(workspace_dir).join(task_id);
        Self {
            project_dir: root.join("project"),
            opencode_dir: root.join(".opencode"),
            logs_dir: root.join("logs"),
            root,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    workspace_dir: String,
}

impl WorkspaceManager {
    #[must_use]
    pub fn new(workspace_dir: impl Into<String>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
        }
    }

    /// Create the workspace tree for a task and write its resolved
    /// settings document into `.opencode`.
    ///
    /// Idempotent: calling this twice for the same `task_id` leaves the
    /// same tree in place and simply overwrites the settings document.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created or the
    /// settings document cannot be written.
    #[instrument(skip(self, settings), fields(task_id = %task_id))]
    pub async fn prepare(
        &self,
        task_id: &str,
        settings: &RunnerSettings,
    ) -> std::io::Result<Workspace> {
        let workspace = Workspace::for_task(&self.workspace_dir, task_id);

        tokio::fs::create_dir_all(&workspace.project_dir).await?;
        tokio::fs::create_dir_all(&workspace.opencode_dir).await?;
        tokio::fs::create_dir_all(&workspace.logs_dir).await?;

        let settings_path = workspace.opencode_dir.join("settings.json");
        let body = serde_json::to_vec_pretty(settings)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&settings_path, body).await?;

        Ok(workspace)
    }

    /// Remove a task's workspace tree entirely.
    ///
    /// Failures are logged and swallowed: a teardown failure must never
    /// prevent a Runner from reaching `Stopped`.
    #[instrument(skip(self))]
    pub async fn teardown(&self, workspace: &Workspace) {
        if let Err(e) = tokio::fs::remove_dir_all(&workspace.root).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, root = %workspace.root.display(), "failed to remove workspace");
            }
        }
    }
}
