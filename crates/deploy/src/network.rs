//! Shared network setup.

use crate::{
    NetworkError,
    runtime::{ContainerRuntime, RuntimeError},
};

/// Make sure the network `name` exists.
///
/// Idempotent: an existing network is left as is, and losing a creation race
/// to another caller counts as success.
pub async fn ensure_network<R: ContainerRuntime>(
    runtime: &R,
    name: &str,
) -> Result<(), NetworkError> {
    let exists = runtime
        .network_exists(name)
        .await
        .map_err(|e| NetworkError::Inspect {
            name: name.to_string(),
            message: e.to_string(),
        })?;

    if exists {
        tracing::debug!(network = name, "Docker network already exists");
        return Ok(());
    }

    match runtime.create_network(name).await {
        Ok(()) => {
            tracing::info!(network = name, "Docker network created");
            Ok(())
        }
        Err(RuntimeError::AlreadyExists(_)) => {
            tracing::debug!(network = name, "Docker network created concurrently");
            Ok(())
        }
        Err(e) => Err(NetworkError::Create {
            name: name.to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Mutex};

    use super::*;
    use crate::{EnvFile, ServiceHandler, services::ServiceSpec};

    #[derive(Default)]
    struct FakeNetworks {
        networks: Mutex<BTreeSet<String>>,
        /// Report the network as missing on inspection but already taken on creation.
        racing: bool,
        failing: bool,
    }

    impl ContainerRuntime for FakeNetworks {
        async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
            if self.racing {
                return Ok(false);
            }
            Ok(self.networks.lock().unwrap().contains(name))
        }

        async fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
            if self.failing {
                return Err(RuntimeError::Api("daemon unavailable".to_string()));
            }
            if !self.networks.lock().unwrap().insert(name.to_string()) {
                return Err(RuntimeError::AlreadyExists(name.to_string()));
            }
            Ok(())
        }

        async fn start_service(
            &self,
            _spec: &ServiceSpec,
            _env: &EnvFile,
            _network: &str,
        ) -> Result<ServiceHandler, RuntimeError> {
            Err(RuntimeError::Api("not supported".to_string()))
        }
    }

    #[tokio::test]
    async fn test_ensure_network_is_idempotent() {
        let runtime = FakeNetworks::default();

        ensure_network(&runtime, "agentic_network").await.unwrap();
        ensure_network(&runtime, "agentic_network").await.unwrap();

        let networks = runtime.networks.lock().unwrap();
        assert_eq!(networks.len(), 1);
        assert!(networks.contains("agentic_network"));
    }

    #[tokio::test]
    async fn test_concurrent_creation_counts_as_success() {
        let runtime = FakeNetworks {
            racing: true,
            ..Default::default()
        };
        runtime
            .networks
            .lock()
            .unwrap()
            .insert("agentic_network".to_string());

        ensure_network(&runtime, "agentic_network").await.unwrap();
        assert_eq!(runtime.networks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_creation_failure_is_reported() {
        let runtime = FakeNetworks {
            failing: true,
            ..Default::default()
        };

        let err = ensure_network(&runtime, "agentic_network")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Create { ref name, .. } if name == "agentic_network"));
    }
}
