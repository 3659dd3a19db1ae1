//! Text-to-SQL agent service.

use crate::{
    ProvisioningRequest,
    docker::{DockerImage, PortMapping},
    settings::StackSettings,
};

use super::{ReadinessCheck, ServiceKind, ServiceSpec, container_name, index};

pub const NAME: &str = "agent-service";

/// Port the agent API listens on inside the container.
pub const CONTAINER_PORT: u16 = 80;
/// Port the agent API is published on for the host.
pub const HOST_PORT: u16 = 8005;

/// Heartbeat endpoint of the agent API.
pub const HEALTH_PATH: &str = "/api/v1/heartbeat";

/// Default Docker image for the agent service.
pub const DEFAULT_DOCKER_IMAGE: &str = "kaiapi/kai_engine";
/// Default Docker tag for the agent service.
pub const DEFAULT_DOCKER_TAG: &str = "latest";

pub const REQUIRED_ENV_KEYS: &[&str] = &[
    "TYPESENSE_HOST",
    "TYPESENSE_API_KEY",
    "MODEL_FAMILY",
    "MODEL_NAME",
    "ENCRYPT_KEY",
];

pub fn spec(image: DockerImage) -> ServiceSpec {
    ServiceSpec {
        kind: ServiceKind::Agent,
        name: NAME,
        image,
        depends_on: &[index::NAME],
        readiness: ReadinessCheck::Http {
            port: HOST_PORT,
            path: HEALTH_PATH,
        },
        required_env_keys: REQUIRED_ENV_KEYS,
        ports: vec![PortMapping::tcp(CONTAINER_PORT, HOST_PORT)],
        volumes: Vec::new(),
    }
}

/// URL of the agent API on the shared network.
pub fn internal_url() -> String {
    format!("http://{}:{}", container_name(NAME), CONTAINER_PORT)
}

pub(crate) fn env_vars(
    request: &ProvisioningRequest,
    settings: &StackSettings,
) -> Vec<(&'static str, Option<String>)> {
    let env = &settings.env;
    vec![
        ("ORBIT_AGENT_NAME", request.agent_name().map(str::to_string)),
        (
            "ORBIT_AGENT_DESCRIPTION",
            request.agent_description().map(str::to_string),
        ),
        ("TYPESENSE_HOST", Some(container_name(index::NAME))),
        ("TYPESENSE_PORT", Some(index::DEFAULT_PORT.to_string())),
        ("TYPESENSE_PROTOCOL", Some("http".to_string())),
        ("TYPESENSE_API_KEY", env.index_api_key.clone()),
        ("TYPESENSE_TIMEOUT", Some(env.index_timeout_secs.to_string())),
        (
            "MODEL_FAMILY",
            Some(settings.agent_service.model_family.clone()),
        ),
        ("MODEL_NAME", Some(settings.agent_service.model_name.clone())),
        ("GOOGLE_API_KEY", env.google_api_key.clone()),
        ("OPENAI_API_KEY", env.openai_api_key.clone()),
        (
            "AGENT_MAX_ITERATIONS",
            Some(env.agent_max_iterations.to_string()),
        ),
        ("AGENT_TIMEOUT", Some(env.agent_timeout_secs.to_string())),
        ("ENCRYPT_KEY", env.encrypt_key.clone()),
    ]
}
