//! orbit-deploy - Provisioning library for the Orbit agent stack.
//!
//! This crate turns a provisioning request (process type, database connection
//! and agent identity) into generated service env files, a running set of
//! containers on a shared network, and an agent registered with the control
//! plane.

mod config;
pub use config::{CliArgs, ConfigFile, resolve};

mod deployer;
pub use deployer::{DeployOutcome, ServiceDeployer, start_order};

mod docker;
pub use docker::{DockerImage, OrbitDocker, PortMapping, ServiceConfig, ServiceHandler};

mod env;
pub use env::{APP_NAME, EnvFile, EnvFileGenerator, env_file_path};

mod error;
pub use error::{
    DeploymentError, GenerationError, NetworkError, ProvisionError, RegistrationError,
    TimeoutError, ValidationError,
};

mod fs;

mod network;
pub use network::ensure_network;

mod orchestrator;
pub use orchestrator::{Orchestrator, ProvisioningResult};

mod probe;
pub use probe::{HttpProbe, Probe, ReadinessPolicy, create_client, wait_ready};

mod registrar;
pub use registrar::{API_KEY_HEADER, AgentRecord, AgentRegistrar, DB_CONNECTION_ALIAS};

mod request;
pub use request::{
    AgentIdentity, DEFAULT_DB_PORT, DEFAULT_STEP_ORDER, DatabaseConnection, DiscreteConnection,
    ProcessType, ProvisioningRequest,
};

mod runtime;
pub use runtime::{ContainerRuntime, NoRuntime, RuntimeError};

pub mod services;
pub mod settings;
pub use settings::StackSettings;

mod stage;
pub use stage::Stage;
