//! Docker client for managing the stack containers.

use std::collections::HashMap;

use anyhow::{Context, Result};
use bollard::{
    Docker,
    container::{Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions},
    errors::Error as BollardError,
    image::CreateImageOptions,
    network::{CreateNetworkOptions, InspectNetworkOptions},
    secret::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum},
};
use derive_more::Deref;
use futures::StreamExt;

use crate::{
    EnvFile,
    runtime::{ContainerRuntime, RuntimeError},
    services::ServiceSpec,
};

/// How many times the runtime restarts a container that exits with an error.
const ON_FAILURE_MAX_RETRIES: i64 = 5;

/// A TCP port mapping from container port to host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// The port inside the container.
    pub container_port: u16,
    /// The port on the host.
    pub host_port: u16,
}

impl PortMapping {
    /// Create a new TCP port mapping.
    pub fn tcp(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            host_port,
        }
    }

    /// Create a TCP port mapping where container and host ports are the same.
    pub fn tcp_same(port: u16) -> Self {
        Self::tcp(port, port)
    }

    fn container_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

/// A Docker image reference with image name and tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DockerImage {
    /// The image name (e.g., "typesense/typesense").
    pub image: String,
    /// The image tag (e.g., "latest" or "27.1").
    pub tag: String,
}

impl DockerImage {
    /// Create a new DockerImage with the given image name and tag.
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
        }
    }

    /// Get the full image reference (image:tag).
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

impl std::fmt::Display for DockerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}

/// Configuration for starting a service container.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// The Docker image to use.
    pub image: DockerImage,
    /// Port mappings from container to host.
    pub port_mappings: Vec<PortMapping>,
    /// Volume binds (source:target format).
    pub binds: Vec<String>,
    /// Environment variables.
    pub env: Vec<String>,
    /// Labels attached to the container.
    pub labels: HashMap<String, String>,
}

impl ServiceConfig {
    /// Create a new service config with the given image.
    pub fn new(image: DockerImage) -> Self {
        Self {
            image,
            port_mappings: Vec::new(),
            binds: Vec::new(),
            env: Vec::new(),
            labels: HashMap::new(),
        }
    }

    /// Build the container configuration of a stack service.
    pub fn from_spec(spec: &ServiceSpec, env: &EnvFile) -> Self {
        Self::new(spec.image.clone())
            .ports(spec.ports.iter().copied())
            .binds(spec.volumes.iter().cloned())
            .env(env.to_env_vec())
            .label("orbit.service", spec.name)
    }

    /// Add multiple port mappings.
    pub fn ports(mut self, mappings: impl IntoIterator<Item = PortMapping>) -> Self {
        self.port_mappings.extend(mappings);
        self
    }

    /// Add volume binds.
    pub fn binds(mut self, binds: impl IntoIterator<Item = String>) -> Self {
        self.binds.extend(binds);
        self
    }

    /// Set environment variables.
    pub fn env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    /// Add a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Convert into the Docker container configuration, attached to `network`
    /// and restarted by the runtime on failure.
    pub fn into_container_config(self, network: &str) -> Config<String> {
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = self
            .port_mappings
            .iter()
            .map(|pm| {
                (
                    pm.container_key(),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(pm.host_port.to_string()),
                    }]),
                )
            })
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = self
            .port_mappings
            .iter()
            .map(|pm| (pm.container_key(), HashMap::new()))
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: (!self.binds.is_empty()).then_some(self.binds),
            network_mode: Some(network.to_string()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: Some(ON_FAILURE_MAX_RETRIES),
            }),
            ..Default::default()
        };

        Config {
            image: Some(self.image.full_name()),
            env: Some(self.env),
            exposed_ports: Some(exposed_ports),
            labels: Some(self.labels),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Handler returned after starting a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandler {
    /// The service name from the catalog.
    pub service: String,
    /// The container ID.
    pub container_id: String,
    /// The container name.
    pub container_name: String,
    /// Whether an already-running container was kept instead of starting a new one.
    pub reused: bool,
}

/// Docker client wrapper for the Orbit stack.
#[derive(Deref)]
pub struct OrbitDocker {
    #[deref]
    docker: Docker,
}

impl OrbitDocker {
    /// Connect to the local Docker daemon.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;

        Ok(Self { docker })
    }

    pub async fn pull_image(&self, image: &DockerImage) -> Result<()> {
        let full_image = image.full_name();

        // Check if image is already available locally
        if self.docker.inspect_image(&full_image).await.is_ok() {
            tracing::debug!(image = %full_image, "Image already available locally, skipping pull");
            return Ok(());
        }

        tracing::info!(image = %full_image, "Image not found locally, pulling...");

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.image.clone(),
                tag: image.tag.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            let info = result.with_context(|| format!("Failed to pull image '{full_image}'"))?;
            if let Some(status) = info.status {
                tracing::trace!(status, "Image pull");
            }
        }

        Ok(())
    }

    /// Running state of a container, or `None` if it does not exist.
    async fn container_state(&self, container_name: &str) -> Result<Option<(String, bool)>> {
        match self.docker.inspect_container(container_name, None).await {
            Ok(info) => {
                let running = info.state.and_then(|s| s.running).unwrap_or(false);
                Ok(Some((info.id.unwrap_or_default(), running)))
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e).context("Failed to inspect container"),
        }
    }

    async fn start_service_inner(
        &self,
        spec: &ServiceSpec,
        env: &EnvFile,
        network: &str,
    ) -> Result<ServiceHandler> {
        let container_name = spec.container_name();

        match self.container_state(&container_name).await? {
            Some((container_id, true)) => {
                tracing::info!(
                    container_id,
                    container_name,
                    "Container already running, leaving it untouched"
                );
                return Ok(ServiceHandler {
                    service: spec.name.to_string(),
                    container_id,
                    container_name,
                    reused: true,
                });
            }
            Some((container_id, false)) => {
                tracing::debug!(container_id, container_name, "Removing stopped container");
                self.docker
                    .remove_container(
                        &container_id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await
                    .context("Failed to remove stopped container")?;
            }
            None => {}
        }

        self.pull_image(&spec.image).await?;

        let config = ServiceConfig::from_spec(spec, env).into_container_config(network);

        tracing::trace!(container_name, "Creating container");
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .context("Failed to create container")?;

        let container_id = container.id;
        tracing::trace!(container_id, container_name, "Starting container");

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start container")?;

        Ok(ServiceHandler {
            service: spec.name.to_string(),
            container_id,
            container_name,
            reused: false,
        })
    }
}

fn network_error(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::AlreadyExists(message),
        other => RuntimeError::Api(other.to_string()),
    }
}

impl ContainerRuntime for OrbitDocker {
    async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(network_error(e)),
        }
    }

    async fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: true,
            driver: "bridge".to_string(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(network_error)?;

        tracing::trace!(network_id = response.id, "Docker network created");

        Ok(())
    }

    async fn start_service(
        &self,
        spec: &ServiceSpec,
        env: &EnvFile,
        network: &str,
    ) -> Result<ServiceHandler, RuntimeError> {
        self.start_service_inner(spec, env, network)
            .await
            .map_err(|e| RuntimeError::Api(format!("{e:#}")))
    }
}
