//! Search index service.

use crate::{
    docker::{DockerImage, PortMapping},
    settings::StackSettings,
};

use super::{ReadinessCheck, ServiceKind, ServiceSpec};

pub const NAME: &str = "index-service";

/// Default port of the index API, published on the host as-is.
pub const DEFAULT_PORT: u16 = 8108;

/// Health endpoint of the index API.
pub const HEALTH_PATH: &str = "/health";

/// Named volume holding the index data across redeploys.
pub const DATA_VOLUME: &str = "orbit_index_data";
pub const DATA_DIR: &str = "/data";

/// Default Docker image for the index service.
pub const DEFAULT_DOCKER_IMAGE: &str = "typesense/typesense";
/// Default Docker tag for the index service.
pub const DEFAULT_DOCKER_TAG: &str = "27.1";

pub const REQUIRED_ENV_KEYS: &[&str] = &["TYPESENSE_API_KEY", "TYPESENSE_DATA_DIR"];

pub fn spec(image: DockerImage) -> ServiceSpec {
    ServiceSpec {
        kind: ServiceKind::Index,
        name: NAME,
        image,
        depends_on: &[],
        readiness: ReadinessCheck::Http {
            port: DEFAULT_PORT,
            path: HEALTH_PATH,
        },
        required_env_keys: REQUIRED_ENV_KEYS,
        ports: vec![PortMapping::tcp_same(DEFAULT_PORT)],
        volumes: vec![format!("{DATA_VOLUME}:{DATA_DIR}")],
    }
}

pub(crate) fn env_vars(settings: &StackSettings) -> Vec<(&'static str, Option<String>)> {
    vec![
        ("TYPESENSE_API_KEY", settings.env.index_api_key.clone()),
        ("TYPESENSE_DATA_DIR", Some(DATA_DIR.to_string())),
        ("TYPESENSE_ENABLE_CORS", Some("true".to_string())),
    ]
}
