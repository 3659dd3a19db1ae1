//! The narrow interface the pipeline uses to drive the container runtime.

use thiserror::Error;

use crate::{EnvFile, ServiceHandler, services::ServiceSpec};

/// Error reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The resource is already there, e.g. a network created concurrently.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Api(String),
}

/// Runtime operations the provisioning pipeline needs.
///
/// The runtime state (networks, containers) is owned by the runtime itself;
/// implementations only inspect or mutate it through these calls.
#[allow(async_fn_in_trait)]
pub trait ContainerRuntime {
    /// Whether a network with this name exists.
    async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Create a network. Must fail with [`RuntimeError::AlreadyExists`] on a duplicate name.
    async fn create_network(&self, name: &str) -> Result<(), RuntimeError>;

    /// Start `spec` attached to `network` with the given environment.
    ///
    /// Starting a service whose container is already running is a no-op.
    async fn start_service(
        &self,
        spec: &ServiceSpec,
        env: &EnvFile,
        network: &str,
    ) -> Result<ServiceHandler, RuntimeError>;
}

/// Runtime for plans that never touch containers, such as agent creation.
///
/// Every call fails, so a plan that does reach the runtime surfaces the mistake.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRuntime;

impl ContainerRuntime for NoRuntime {
    async fn network_exists(&self, _name: &str) -> Result<bool, RuntimeError> {
        Err(RuntimeError::Api("no container runtime".to_string()))
    }

    async fn create_network(&self, _name: &str) -> Result<(), RuntimeError> {
        Err(RuntimeError::Api("no container runtime".to_string()))
    }

    async fn start_service(
        &self,
        spec: &ServiceSpec,
        _env: &EnvFile,
        _network: &str,
    ) -> Result<ServiceHandler, RuntimeError> {
        Err(RuntimeError::Api(format!(
            "no container runtime to start {}",
            spec.name
        )))
    }
}
