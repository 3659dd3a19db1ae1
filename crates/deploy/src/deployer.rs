//! Dependency-ordered service startup.

use std::collections::{BTreeMap, HashSet};

use crate::{
    DeploymentError, EnvFile, ProvisionError, ServiceHandler, TimeoutError,
    probe::{Probe, ReadinessPolicy, wait_ready},
    runtime::ContainerRuntime,
    services::ServiceSpec,
};

/// Result of the deployment stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOutcome {
    /// Handlers of the started (or reused) services, in start order.
    pub started: Vec<ServiceHandler>,
    /// Services no other service depends on, whose readiness is still unknown.
    pub awaiting_readiness: Vec<String>,
}

/// Order `services` so that every service comes after its dependencies.
///
/// Among services whose dependencies are satisfied, declaration order wins, so
/// the result is stable.
pub fn start_order(services: &[ServiceSpec]) -> Result<Vec<&ServiceSpec>, DeploymentError> {
    let names: HashSet<&str> = services.iter().map(|s| s.name).collect();
    for service in services {
        if let Some(dependency) = service.depends_on.iter().find(|d| !names.contains(**d)) {
            return Err(DeploymentError::UnknownDependency {
                service: service.name.to_string(),
                dependency: dependency.to_string(),
            });
        }
    }

    let mut placed: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(services.len());

    while order.len() < services.len() {
        let next = services.iter().find(|s| {
            !placed.contains(s.name) && s.depends_on.iter().all(|d| placed.contains(d))
        });

        let Some(next) = next else {
            let services = services
                .iter()
                .filter(|s| !placed.contains(s.name))
                .map(|s| s.name.to_string())
                .collect();
            return Err(DeploymentError::DependencyCycle { services });
        };

        placed.insert(next.name);
        order.push(next);
    }

    Ok(order)
}

/// Starts the services of the stack on the shared network.
pub struct ServiceDeployer<'a, R, P> {
    runtime: &'a R,
    probe: &'a P,
    policy: ReadinessPolicy,
    network: &'a str,
}

impl<'a, R: ContainerRuntime, P: Probe> ServiceDeployer<'a, R, P> {
    pub fn new(runtime: &'a R, probe: &'a P, policy: ReadinessPolicy, network: &'a str) -> Self {
        Self {
            runtime,
            probe,
            policy,
            network,
        }
    }

    /// Start every service in dependency order.
    ///
    /// A service is started only once all of its dependencies answered their
    /// readiness check. Services nothing depends on are started but not waited
    /// for; they are reported in [`DeployOutcome::awaiting_readiness`].
    pub async fn deploy(
        &self,
        services: &[ServiceSpec],
        envs: &BTreeMap<String, EnvFile>,
    ) -> Result<DeployOutcome, ProvisionError> {
        let order = start_order(services)?;
        let mut ready: HashSet<&str> = HashSet::new();
        let mut outcome = DeployOutcome::default();

        for service in &order {
            for dependency in service.depends_on {
                if ready.contains(dependency) {
                    continue;
                }
                // start_order already checked that every dependency is declared
                if let Some(dep_spec) = services.iter().find(|s| s.name == *dependency) {
                    tracing::info!(service = service.name, dependency, "Waiting for dependency to be ready");
                    wait_ready(self.probe, dep_spec, &self.policy).await?;
                    ready.insert(dep_spec.name);
                }
            }

            let env = envs
                .get(service.name)
                .ok_or_else(|| DeploymentError::MissingEnv {
                    service: service.name.to_string(),
                })?;

            tracing::info!(service = service.name, image = %service.image, "Starting service");
            let handler = self
                .runtime
                .start_service(service, env, self.network)
                .await
                .map_err(|e| DeploymentError::StartFailed {
                    service: service.name.to_string(),
                    message: e.to_string(),
                })?;

            tracing::info!(
                service = service.name,
                container_id = handler.container_id,
                reused = handler.reused,
                "Service started"
            );
            outcome.started.push(handler);
        }

        outcome.awaiting_readiness = order
            .iter()
            .filter(|s| !ready.contains(s.name))
            .map(|s| s.name.to_string())
            .collect();

        Ok(outcome)
    }

    /// Wait for the services left over by [`Self::deploy`].
    pub async fn wait_remaining(
        &self,
        services: &[ServiceSpec],
        outcome: &DeployOutcome,
    ) -> Result<(), TimeoutError> {
        for name in &outcome.awaiting_readiness {
            if let Some(service) = services.iter().find(|s| s.name == name.as_str()) {
                wait_ready(self.probe, service, &self.policy).await?;
            }
        }
        Ok(())
    }
}
