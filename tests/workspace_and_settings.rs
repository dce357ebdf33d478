//! End-to-end: a task's `RunnerSettings` are substituted and the
//! resolved document lands in the workspace the container will mount.

use runnerd::settings_manager::{McpServerConfig, RunnerSettings, SettingsManager};
use runnerd::workspace::WorkspaceManager;
use std::collections::HashMap;

#[tokio::test]
async fn resolved_settings_are_written_into_workspace() {
    std::env::set_var("RUNNERD_IT_TOKEN", "it-secret");

    let manager = SettingsManager::new();
    let mut settings = RunnerSettings::default();
    settings.mcp_servers.push(McpServerConfig {
        name: "search".to_string(),
        command: "mcp-search".to_string(),
        args: vec!["--key".to_string(), "${RUNNERD_IT_TOKEN}".to_string()],
        env: HashMap::new(),
    });

    let resolved = manager.build(settings).expect("substitution should succeed");

    let workspace_dir = std::env::temp_dir().join(format!(
        "runnerd-it-workspace-{}",
        uuid::Uuid::new_v4()
    ));
    let workspace_manager = WorkspaceManager::new(workspace_dir.to_string_lossy().to_string());
    let workspace = workspace_manager
        .prepare("task-with-mcp", &resolved)
        .await
        .expect("prepare should succeed");

    let written = tokio::fs::read_to_string(workspace.opencode_dir.join("settings.json"))
        .await
        .expect("settings document should exist");
    assert!(written.contains("it-secret"));
    assert!(!written.contains("${RUNNERD_IT_TOKEN}"));

    workspace_manager.teardown(&workspace).await;
    std::env::remove_var("RUNNERD_IT_TOKEN");
}

#[tokio::test]
async fn missing_variable_is_rejected_before_any_workspace_is_created() {
    std::env::remove_var("RUNNERD_IT_MISSING");
    let manager = SettingsManager::new();
    let mut settings = RunnerSettings::default();
    settings.model = "${RUNNERD_IT_MISSING}".to_string();

    let result = manager.build(settings);
    assert!(result.is_err());
}
