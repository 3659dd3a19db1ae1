//! Orbit worker service.

use crate::{ProvisioningRequest, docker::DockerImage, settings::StackSettings};

use super::{ReadinessCheck, ServiceKind, ServiceSpec, agent};

pub const NAME: &str = "worker-service";

/// Default Docker image for the worker service.
pub const DEFAULT_DOCKER_IMAGE: &str = "orbitapi/orbit_worker";
/// Default Docker tag for the worker service.
pub const DEFAULT_DOCKER_TAG: &str = "latest";

pub const REQUIRED_ENV_KEYS: &[&str] = &[
    "ORBIT_API_KEY",
    "ORBIT_DB_CONNECTION_URI",
    "AGENT_SERVICE_URL",
];

/// The worker has no health endpoint and publishes no port.
pub fn spec(image: DockerImage) -> ServiceSpec {
    ServiceSpec {
        kind: ServiceKind::Worker,
        name: NAME,
        image,
        depends_on: &[agent::NAME],
        readiness: ReadinessCheck::SettleDelay,
        required_env_keys: REQUIRED_ENV_KEYS,
        ports: Vec::new(),
        volumes: Vec::new(),
    }
}

pub(crate) fn env_vars(
    request: &ProvisioningRequest,
    _settings: &StackSettings,
) -> Vec<(&'static str, Option<String>)> {
    vec![
        ("ORBIT_API_KEY", request.api_key.clone()),
        ("ORBIT_JWT_TOKEN", request.jwt_token.clone()),
        ("ORBIT_PROCESS_ID", request.process_id.clone()),
        ("ORBIT_STEP_ORDER", Some(request.step_order.to_string())),
        ("ORBIT_DB_CONNECTION_URI", Some(request.db.connection_string())),
        ("AGENT_SERVICE_URL", Some(agent::internal_url())),
    ]
}
