//! The provisioning pipeline.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use backon::{ConstantBuilder, Retryable};

use crate::{
    AgentRecord, AgentRegistrar, CliArgs, DeployOutcome, EnvFile, EnvFileGenerator, ProcessType,
    ProvisionError, ProvisioningRequest, RegistrationError, ServiceDeployer, ServiceHandler, Stage,
    StackSettings, config,
    network::ensure_network,
    probe::{Probe, ReadinessPolicy},
    runtime::ContainerRuntime,
    services::{self, ServiceSpec},
};

/// Outcome of one invocation.
#[derive(Debug)]
pub struct ProvisioningResult {
    /// `Done` on success, the failing stage otherwise.
    pub stage_reached: Stage,
    /// Stages that completed, in order.
    pub completed: Vec<Stage>,
    pub error: Option<ProvisionError>,
    pub request: Option<ProvisioningRequest>,
    pub env_files: Vec<PathBuf>,
    pub services: Vec<ServiceHandler>,
    pub agent: Option<AgentRecord>,
}

impl Default for ProvisioningResult {
    fn default() -> Self {
        Self {
            stage_reached: Stage::Validate,
            completed: Vec::new(),
            error: None,
            request: None,
            env_files: Vec::new(),
            services: Vec::new(),
            agent: None,
        }
    }
}

impl ProvisioningResult {
    pub fn succeeded(&self) -> bool {
        self.stage_reached == Stage::Done && self.error.is_none()
    }

    pub fn exit_code(&self) -> u8 {
        match &self.error {
            Some(err) => err.exit_code(),
            None => self.stage_reached.exit_code(),
        }
    }

    /// A run that stopped at the stage `error` belongs to.
    pub fn failed(error: impl Into<ProvisionError>) -> Self {
        Self::default().fail(error.into())
    }

    fn fail(mut self, error: ProvisionError) -> Self {
        self.stage_reached = error.stage();
        tracing::error!(stage = %self.stage_reached, error = %error, "Provisioning failed");
        self.error = Some(error);
        self
    }
}

/// Drives a provisioning request through its stages.
///
/// One pass per invocation: nothing is persisted between runs, and a failed
/// stage ends the run.
pub struct Orchestrator<'a, R, P> {
    runtime: &'a R,
    probe: &'a P,
    registrar: AgentRegistrar,
    settings: StackSettings,
    services: Vec<ServiceSpec>,
}

impl<'a, R: ContainerRuntime, P: Probe> Orchestrator<'a, R, P> {
    pub fn new(runtime: &'a R, probe: &'a P, settings: StackSettings) -> anyhow::Result<Self> {
        let registrar =
            AgentRegistrar::new(settings.registry.clone(), settings.agent_service.clone())?;
        let services = services::catalog(&settings.images);

        Ok(Self {
            runtime,
            probe,
            registrar,
            settings,
            services,
        })
    }

    /// Replace the compiled-in service catalog.
    pub fn with_services(mut self, services: Vec<ServiceSpec>) -> Self {
        self.services = services;
        self
    }

    pub fn settings(&self) -> &StackSettings {
        &self.settings
    }

    /// Validate the inputs, then provision.
    pub async fn run(&self, config_file: Option<&Path>, cli: &CliArgs) -> ProvisioningResult {
        tracing::info!(stage = %Stage::Validate, "Stage started");

        match config::resolve(config_file, cli) {
            Ok(request) => self.provision(request).await,
            Err(e) => ProvisioningResult::failed(e),
        }
    }

    /// Run the stages planned for the process type of an already validated request.
    pub async fn provision(&self, request: ProvisioningRequest) -> ProvisioningResult {
        let mut result = ProvisioningResult {
            completed: vec![Stage::Validate],
            ..Default::default()
        };
        let outcome = self.execute(&request, &mut result).await;
        result.request = Some(request);

        match outcome {
            Ok(()) => {
                result.stage_reached = Stage::Done;
                tracing::info!(stages = result.completed.len(), "Provisioning done");
                result
            }
            Err(e) => result.fail(e),
        }
    }

    async fn execute(
        &self,
        request: &ProvisioningRequest,
        result: &mut ProvisioningResult,
    ) -> Result<(), ProvisionError> {
        let deployer = ServiceDeployer::new(
            self.runtime,
            self.probe,
            ReadinessPolicy::from(&self.settings.readiness),
            &self.settings.network_name,
        );
        let mut envs = BTreeMap::new();
        let mut deployed = DeployOutcome::default();

        for &stage in Stage::plan(request.process_type) {
            result.stage_reached = stage;
            tracing::info!(stage = %stage, process_type = %request.process_type, "Stage started");

            match stage {
                Stage::GenerateEnv => {
                    envs = self.generate_env(request, &mut result.env_files)?;
                }
                Stage::EnsureNetwork => {
                    ensure_network(self.runtime, &self.settings.network_name).await?;
                }
                Stage::DeployServices => {
                    deployed = deployer.deploy(&self.services, &envs).await?;
                    result.services = deployed.started.clone();
                }
                Stage::WaitReady => {
                    deployer.wait_remaining(&self.services, &deployed).await?;
                }
                Stage::RegisterAgent => {
                    result.agent = Some(self.register(request).await?);
                }
                Stage::Validate | Stage::Done => {}
            }

            result.completed.push(stage);
        }

        Ok(())
    }

    /// Render every env file before writing any, so a resolution failure leaves no files behind.
    fn generate_env(
        &self,
        request: &ProvisioningRequest,
        written: &mut Vec<PathBuf>,
    ) -> Result<BTreeMap<String, EnvFile>, ProvisionError> {
        let generator = EnvFileGenerator::new(&self.settings);

        let envs = self
            .services
            .iter()
            .map(|service| generator.generate(request, service).map(|env| (service, env)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut by_name = BTreeMap::new();
        for (service, env) in envs {
            written.push(generator.write(service, &env)?);
            by_name.insert(service.name.to_string(), env);
        }

        Ok(by_name)
    }

    /// Register the agent. The agent-service bootstrap runs once; only the
    /// control-plane call is retried, and only on transport failures.
    async fn register(&self, request: &ProvisioningRequest) -> Result<AgentRecord, RegistrationError> {
        let connection_id = match request.process_type {
            ProcessType::InitialProvisioningOrbit => Some(
                self.registrar
                    .bootstrap_agent_service(&request.db.connection_string())
                    .await?,
            ),
            ProcessType::CreateAgentOrbit => None,
        };

        let backoff = ConstantBuilder::default()
            .with_delay(self.settings.registry.retry_delay())
            .with_max_times(self.settings.registry.retries);

        (|| self.registrar.submit(request, connection_id.clone()))
            .retry(backoff)
            .when(RegistrationError::is_transport)
            .notify(|err: &RegistrationError, delay: Duration| {
                tracing::warn!(error = %err, ?delay, "Registration failed, retrying...");
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationError;

    #[test]
    fn test_result_exit_codes() {
        let result = ProvisioningResult::failed(ValidationError::AmbiguousSource);
        assert_eq!(result.stage_reached, Stage::Validate);
        assert_eq!(result.exit_code(), 2);
        assert!(!result.succeeded());

        let done = ProvisioningResult {
            stage_reached: Stage::Done,
            ..Default::default()
        };
        assert!(done.succeeded());
        assert_eq!(done.exit_code(), 0);
    }
}
