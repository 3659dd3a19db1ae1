//! Service catalog of the Orbit stack.
//!
//! Each service lives in its own submodule with its image defaults, port
//! layout, readiness check and the env vars it is rendered with. The catalog is
//! compiled in; only image references can be overridden through settings.

pub mod agent;
pub mod index;
pub mod worker;

use crate::{
    ProvisioningRequest,
    docker::{DockerImage, PortMapping},
    settings::{ImageSettings, StackSettings},
};

/// Prefix of every container name created by this tool.
pub const CONTAINER_PREFIX: &str = "orbit";

/// Which of the compiled-in services a spec describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Index,
    Agent,
    Worker,
}

/// How a started service proves it is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessCheck {
    /// Poll `GET http://<host>:<port><path>` until it answers with a 2xx status.
    /// `port` is the port published on the host.
    Http { port: u16, path: &'static str },
    /// The service exposes no health signal; wait the configured settle delay.
    SettleDelay,
}

/// Static declaration of a deployable service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub kind: ServiceKind,
    pub name: &'static str,
    pub image: DockerImage,
    pub depends_on: &'static [&'static str],
    pub readiness: ReadinessCheck,
    pub required_env_keys: &'static [&'static str],
    pub ports: Vec<PortMapping>,
    /// Volume binds in `source:target` form.
    pub volumes: Vec<String>,
}

impl ServiceSpec {
    /// Container name, also the hostname on the shared network.
    pub fn container_name(&self) -> String {
        container_name(self.name)
    }

    /// Candidate env vars for this service. `None` values are unresolved.
    pub(crate) fn env_vars(
        &self,
        request: &ProvisioningRequest,
        settings: &StackSettings,
    ) -> Vec<(&'static str, Option<String>)> {
        match self.kind {
            ServiceKind::Index => index::env_vars(settings),
            ServiceKind::Agent => agent::env_vars(request, settings),
            ServiceKind::Worker => worker::env_vars(request, settings),
        }
    }
}

/// Container name of the service with the given name.
pub fn container_name(service: &str) -> String {
    format!("{CONTAINER_PREFIX}-{service}")
}

/// The three services of the stack, in declaration order.
pub fn catalog(images: &ImageSettings) -> Vec<ServiceSpec> {
    vec![
        index::spec(images.index.clone()),
        agent::spec(images.agent.clone()),
        worker::spec(images.worker.clone()),
    ]
}
