//! Error taxonomy
//!
//! Library code never panics on an expected failure; everything
//! bottoms out in one of the enums below so callers can match on
//! cause instead of parsing strings.

use crate::runner::RunnerId;

/// Top-level error returned by the Runner Manager's public API.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("runner {0} not found")]
    NotFound(RunnerId),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("runner {0} is not ready")]
    RunnerNotReady(RunnerId),

    #[error("maximum container count ({0}) reached")]
    MaxContainersReached(usize),

    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("agent-server error: {0}")]
    AgentServer(#[from] AgentServerError),

    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Errors surfaced by the `ContainerRuntime` trait.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContainerError {
    #[error("failed to create container: {0}")]
    CreateFailed(String),

    #[error("failed to start container {id}: {cause}")]
    StartFailed { id: String, cause: String },

    #[error("container {0} not found")]
    NotFound(String),

    #[error("docker daemon unreachable: {0}")]
    DaemonUnreachable(String),
}

/// Errors surfaced by the Agent-Server Client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentServerError {
    #[error("request to agent-server timed out")]
    ApiTimeout,

    #[error("could not connect to agent-server: {0}")]
    ApiConnectionFailed(String),

    #[error("agent-server returned {status}: {message}")]
    ApiError {
        status: u16,
        message: String,
        body: String,
    },

    #[error("resource not found")]
    NotFound,
}

/// Errors surfaced while building or resolving per-task `RunnerSettings`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("unresolved environment variable: {0}")]
    MissingVariable(String),

    #[error("invalid runner settings: {0}")]
    Invalid(String),
}

/// Whether an error should be retried by the Recovery Manager or treated
/// as final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Terminal,
}

impl AgentServerError {
    #[must_use]
    pub const fn classify(&self) -> Classification {
        match self {
            Self::ApiTimeout | Self::ApiConnectionFailed(_) => Classification::Retryable,
            Self::ApiError { .. } | Self::NotFound => Classification::Terminal,
        }
    }
}

impl ContainerError {
    #[must_use]
    pub const fn classify(&self) -> Classification {
        match self {
            Self::StartFailed { .. } | Self::DaemonUnreachable(_) => Classification::Retryable,
            Self::CreateFailed(_) | Self::NotFound(_) => Classification::Terminal,
        }
    }
}
