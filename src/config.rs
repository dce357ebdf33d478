//! Configuration and settings management
//!
//! Loads process-wide settings from environment variables (and an
//! optional config file) and defines the defaults for every tunable
//! named in the environment variable table.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide settings loaded once at startup.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub runner_image: String,
    pub runner_workspace_dir: String,
    pub runner_agent_server_port: u16,
    pub docker_host: Option<String>,

    pub idle_timeout_secs: u64,
    pub max_runtime_secs: u64,
    pub cleanup_interval_secs: u64,
    pub max_containers: usize,
    pub shutdown_timeout_secs: u64,

    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            runner_image: RUNNER_IMAGE.to_string(),
            runner_workspace_dir: RUNNER_WORKSPACE_DIR.to_string(),
            runner_agent_server_port: RUNNER_AGENT_SERVER_PORT,
            docker_host: None,
            idle_timeout_secs: RUNNER_IDLE_TIMEOUT_SECS,
            max_runtime_secs: RUNNER_MAX_RUNTIME_SECS,
            cleanup_interval_secs: RUNNER_CLEANUP_INTERVAL_SECS,
            max_containers: RUNNER_MAX_CONTAINERS,
            shutdown_timeout_secs: RUNNER_SHUTDOWN_TIMEOUT_SECS,
            max_retries: RUNNER_MAX_RETRIES,
            retry_base_delay_ms: RUNNER_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: RUNNER_RETRY_MAX_DELAY_MS,
        }
    }
}

impl Settings {
    /// Load settings, layering an optional config file under environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the layered sources cannot be merged or
    /// deserialized.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let s = Config::builder()
            .set_default("runner_image", defaults.runner_image.clone())?
            .set_default("runner_workspace_dir", defaults.runner_workspace_dir.clone())?
            .set_default("runner_agent_server_port", i64::from(defaults.runner_agent_server_port))?
            .set_default("idle_timeout_secs", defaults.idle_timeout_secs as i64)?
            .set_default("max_runtime_secs", defaults.max_runtime_secs as i64)?
            .set_default("cleanup_interval_secs", defaults.cleanup_interval_secs as i64)?
            .set_default("max_containers", defaults.max_containers as i64)?
            .set_default("shutdown_timeout_secs", defaults.shutdown_timeout_secs as i64)?
            .set_default("max_retries", defaults.max_retries as i64)?
            .set_default("retry_base_delay_ms", defaults.retry_base_delay_ms as i64)?
            .set_default("retry_max_delay_ms", defaults.retry_max_delay_ms as i64)?
            .add_source(File::with_name("config/runner").required(false))
            .add_source(Environment::with_prefix("RUNNER").separator("__"))
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        if let Ok(val) = std::env::var("DOCKER_HOST") {
            if !val.is_empty() {
                settings.docker_host = Some(val);
            }
        }

        if settings.max_containers == 0 {
            return Err(ConfigError::Message(
                "RUNNER_MAX_CONTAINERS must be at least 1".to_string(),
            ));
        }

        Ok(settings)
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub const fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }

    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    #[must_use]
    pub const fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Docker image reference for the agent-server container.
pub const RUNNER_IMAGE: &str = "agent-server:latest";
/// Host directory under which per-task workspaces are created.
pub const RUNNER_WORKSPACE_DIR: &str = "./workspaces";
/// Container-internal port the agent-server listens on.
pub const RUNNER_AGENT_SERVER_PORT: u16 = 4096;
/// Seconds before an idle `Ready` runner is reclaimed.
pub const RUNNER_IDLE_TIMEOUT_SECS: u64 = 600;
/// Seconds before any runner is force-stopped regardless of activity.
pub const RUNNER_MAX_RUNTIME_SECS: u64 = 3600;
/// Seconds between Lifecycle Manager sweeps.
pub const RUNNER_CLEANUP_INTERVAL_SECS: u64 = 30;
/// Concurrency cap on non-terminal runners.
pub const RUNNER_MAX_CONTAINERS: usize = 10;
/// Seconds given to a graceful session close before force-stop.
pub const RUNNER_SHUTDOWN_TIMEOUT_SECS: u64 = 15;
/// Recovery Manager retry budget.
pub const RUNNER_MAX_RETRIES: usize = 5;
/// Recovery Manager base backoff, in milliseconds.
pub const RUNNER_RETRY_BASE_DELAY_MS: u64 = 200;
/// Recovery Manager backoff cap, in milliseconds.
pub const RUNNER_RETRY_MAX_DELAY_MS: u64 = 10_000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Settings::load reads process environment, so tests that mutate env
    // vars are serialized against each other like the upstream config
    // test module.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_documented_table() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let settings = Settings::default();
        assert_eq!(settings.idle_timeout_secs, 600);
        assert_eq!(settings.max_containers, 10);
        assert_eq!(settings.runner_agent_server_port, 4096);
    }

    #[test]
    fn env_override_wins_over_default() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::env::set_var("RUNNER_MAX_CONTAINERS", "42");
        let settings = Settings::load().expect("settings should load");
        assert_eq!(settings.max_containers, 42);
        std::env::remove_var("RUNNER_MAX_CONTAINERS");
    }

    #[test]
    fn rejects_zero_max_containers() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::env::set_var("RUNNER_MAX_CONTAINERS", "0");
        let result = Settings::load();
        assert!(result.is_err());
        std::env::remove_var("RUNNER_MAX_CONTAINERS");
    }
}
