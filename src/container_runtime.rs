//! Container Runtime abstraction
//!
//! A thin trait around the Docker Engine API so the Runner never talks
//! to `bollard` directly; `BollardRuntime` is the concrete adapter used
//! in production, following the same connect/ping/create/start shape
//! as the sandbox container manager this crate is descended from.

use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::ContainerError;

#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub container_port: u16,
    pub env: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
    pub binds: Vec<String>,
    pub memory_limit_bytes: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub running: bool,
    pub host_port: Option<u16>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_container(&self, spec: ContainerSpec) -> Result<String, ContainerError>;
    async fn start_container(&self, id: &str) -> Result<(), ContainerError>;
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), ContainerError>;
    async fn remove_container(&self, id: &str) -> Result<(), ContainerError>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, ContainerError>;
    async fn container_logs(&self, id: &str) -> Result<String, ContainerError>;
    async fn ping(&self) -> Result<(), ContainerError>;
}

/// `ContainerRuntime` backed by a real Docker daemon via `bollard`.
#[derive(Clone)]
pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    /// Connect to the local Docker daemon using its default connection
    /// method, optionally overridden by `DOCKER_HOST`.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::DaemonUnreachable` if the daemon cannot
    /// be reached.
    pub fn connect(docker_host: Option<&str>) -> Result<Self, ContainerError> {
        let docker = match docker_host {
            Some(host) => Docker::connect_with_http(host, 30, bollard::API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| ContainerError::DaemonUnreachable(e.to_string()))?;

        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    #[instrument(skip(self))]
    async fn create_container(&self, spec: ContainerSpec) -> Result<String, ContainerError> {
        let container_port_key = format!("{}/tcp", spec.container_port);
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: None,
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port_key, HashMap::new());

        let host_config = HostConfig {
            memory: spec.memory_limit_bytes,
            port_bindings: Some(port_bindings),
            publish_all_ports: Some(true),
            binds: Some(spec.binds),
            ..Default::default()
        };

        let env = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>();

        let config = ContainerCreateBody {
            image: Some(spec.image),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(spec.labels),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(spec.name),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| ContainerError::CreateFailed(e.to_string()))?;

        debug!(container_id = %response.id, "container created");
        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| ContainerError::StartFailed {
                id: id.to_string(),
                cause: e.to_string(),
            })?;
        info!(container_id = %id, "container started");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), ContainerError> {
        let options = StopContainerOptions {
            t: Some(i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX)),
            ..Default::default()
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(ContainerError::NotFound(id.to_string())),
            Err(e) => {
                warn!(container_id = %id, error = %e, "stop_container failed");
                Err(ContainerError::StartFailed {
                    id: id.to_string(),
                    cause: e.to_string(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, id: &str) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => {
                warn!(container_id = %id, error = %e, "remove_container failed");
                Err(ContainerError::CreateFailed(e.to_string()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, ContainerError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| ContainerError::NotFound(format!("{id}: {e}")))?;

        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        let host_port = inspect
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
            .and_then(|ports| ports.values().flatten().next())
            .and_then(|bindings| bindings.first())
            .and_then(|binding| binding.host_port.as_ref())
            .and_then(|p| p.parse().ok());

        Ok(ContainerStatus { running, host_port })
    }

    #[instrument(skip(self))]
    async fn container_logs(&self, id: &str) -> Result<String, ContainerError> {
        use futures_util::StreamExt;

        let options = LogsOptions {
            stdout: true,
            stderr: true,
            tail: "200".to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut logs = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => logs.push_str(&output.to_string()),
                Err(e) => return Err(ContainerError::NotFound(format!("{id}: {e}"))),
            }
        }
        Ok(logs)
    }

    async fn ping(&self) -> Result<(), ContainerError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| ContainerError::DaemonUnreachable(e.to_string()))
    }
}
