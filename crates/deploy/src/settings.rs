//! Operator settings for the provisioning tool.
//!
//! These are the knobs that are not part of a provisioning request: where env
//! files go, which images to run, how long to wait for readiness and where the
//! control plane lives.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    docker::DockerImage,
    services::{agent, index, worker},
};

/// The default settings file name, looked up in the working directory.
pub const SETTINGS_FILENAME: &str = "Orbit.toml";

/// Prefix of the environment variables overriding settings.
pub const SETTINGS_ENV_PREFIX: &str = "ORBIT_SETUP_";

/// Default name of the shared container network.
pub const DEFAULT_NETWORK_NAME: &str = "agentic_network";

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSettings {
    /// Name of the shared network every service joins.
    #[serde(default = "default_network_name")]
    pub network_name: String,

    /// Directory receiving generated env files (under `docker/`).
    #[serde(default = "default_outdata")]
    pub outdata: PathBuf,

    #[serde(default)]
    pub readiness: ReadinessSettings,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub agent_service: AgentServiceSettings,

    #[serde(default)]
    pub env: EnvSettings,

    #[serde(default)]
    pub images: ImageSettings,
}

fn default_network_name() -> String {
    DEFAULT_NETWORK_NAME.to_string()
}

fn default_outdata() -> PathBuf {
    PathBuf::from("orbit-data")
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            network_name: default_network_name(),
            outdata: default_outdata(),
            readiness: ReadinessSettings::default(),
            registry: RegistrySettings::default(),
            agent_service: AgentServiceSettings::default(),
            env: EnvSettings::default(),
            images: ImageSettings::default(),
        }
    }
}

impl StackSettings {
    /// Load settings from the default sources.
    ///
    /// Sources are merged in this order (later sources override earlier):
    /// 1. Default values
    /// 2. The given TOML file, or `Orbit.toml` in the current directory (if present)
    /// 3. Environment variables with the `ORBIT_SETUP_` prefix, nested keys split on `__`
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let file = path
            .cloned()
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILENAME));

        if path.is_some() && !file.exists() {
            anyhow::bail!("Settings file not found: {}", file.display());
        }

        let settings: Self = Self::figment(file)
            .extract()
            .context("Failed to load settings")?;

        tracing::debug!(?settings.network_name, outdata = %settings.outdata.display(), "Settings loaded");

        Ok(settings)
    }

    fn figment(file: PathBuf) -> Figment {
        Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX).split("__"))
    }

    /// Directory where the per-service env files are written.
    pub fn env_dir(&self) -> PathBuf {
        self.outdata.join("docker")
    }
}

/// Readiness polling budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessSettings {
    /// Maximum time to wait for a polled service.
    #[serde(default = "default_readiness_timeout_secs")]
    pub timeout_secs: u64,

    /// Interval between two polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay applied to services without a health endpoint.
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,
}

const fn default_readiness_timeout_secs() -> u64 {
    120
}

const fn default_poll_interval_ms() -> u64 {
    2000
}

const fn default_settle_delay_secs() -> u64 {
    10
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_readiness_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_secs: default_settle_delay_secs(),
        }
    }
}

impl ReadinessSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// Remote control-plane endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_registry_url")]
    pub base_url: String,

    /// Full provisioning endpoint (connection + schema setup + agent).
    #[serde(default = "default_provision_path")]
    pub provision_path: String,

    /// Agent-only endpoint.
    #[serde(default = "default_agent_path")]
    pub agent_path: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Extra attempts after a transport failure. Rejections are never retried.
    #[serde(default)]
    pub retries: usize,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_registry_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_provision_path() -> String {
    "/api/v1/orbit/provision".to_string()
}

fn default_agent_path() -> String {
    "/api/v1/agents".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            provision_path: default_provision_path(),
            agent_path: default_agent_path(),
            request_timeout_secs: default_request_timeout_secs(),
            retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RegistrySettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// The host-side view of the deployed agent service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentServiceSettings {
    /// URL of the agent service as seen from the host running this tool.
    #[serde(default = "default_agent_service_url")]
    pub url: String,

    #[serde(default = "default_model_family")]
    pub model_family: String,

    #[serde(default = "default_model_name")]
    pub model_name: String,
}

fn default_agent_service_url() -> String {
    "http://localhost:8005".to_string()
}

fn default_model_family() -> String {
    "google".to_string()
}

fn default_model_name() -> String {
    "gemini-2.0-flash".to_string()
}

impl Default for AgentServiceSettings {
    fn default() -> Self {
        Self {
            url: default_agent_service_url(),
            model_family: default_model_family(),
            model_name: default_model_name(),
        }
    }
}

/// Secrets and limits rendered into the service env files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSettings {
    #[serde(default)]
    pub google_api_key: Option<String>,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    /// Key the agent service encrypts stored credentials with.
    #[serde(default)]
    pub encrypt_key: Option<String>,

    #[serde(default = "default_index_api_key")]
    pub index_api_key: Option<String>,

    #[serde(default = "default_index_timeout_secs")]
    pub index_timeout_secs: u64,

    #[serde(default = "default_agent_max_iterations")]
    pub agent_max_iterations: u32,

    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
}

fn default_index_api_key() -> Option<String> {
    Some("orbit-index-key".to_string())
}

const fn default_index_timeout_secs() -> u64 {
    2
}

const fn default_agent_max_iterations() -> u32 {
    20
}

const fn default_agent_timeout_secs() -> u64 {
    60
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            google_api_key: None,
            openai_api_key: None,
            encrypt_key: None,
            index_api_key: default_index_api_key(),
            index_timeout_secs: default_index_timeout_secs(),
            agent_max_iterations: default_agent_max_iterations(),
            agent_timeout_secs: default_agent_timeout_secs(),
        }
    }
}

/// Image references of the three services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSettings {
    #[serde(default = "default_index_image")]
    pub index: DockerImage,

    #[serde(default = "default_agent_image")]
    pub agent: DockerImage,

    #[serde(default = "default_worker_image")]
    pub worker: DockerImage,
}

fn default_index_image() -> DockerImage {
    DockerImage::new(index::DEFAULT_DOCKER_IMAGE, index::DEFAULT_DOCKER_TAG)
}

fn default_agent_image() -> DockerImage {
    DockerImage::new(agent::DEFAULT_DOCKER_IMAGE, agent::DEFAULT_DOCKER_TAG)
}

fn default_worker_image() -> DockerImage {
    DockerImage::new(worker::DEFAULT_DOCKER_IMAGE, worker::DEFAULT_DOCKER_TAG)
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            index: default_index_image(),
            agent: default_agent_image(),
            worker: default_worker_image(),
        }
    }
}
