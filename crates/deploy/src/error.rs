//! Error taxonomy for a provisioning run.
//!
//! Every component reports failures through its own typed error. The
//! orchestrator folds them into [`ProvisionError`], which knows the stage it
//! belongs to and therefore the exit code of the run.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::Stage;

/// Bad, ambiguous or incomplete input. Raised before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("ambiguous source")]
    AmbiguousSource,

    #[error("incomplete db connection")]
    IncompleteDbConnection,

    #[error("ambiguous db connection")]
    AmbiguousDbConnection,

    #[error("missing db connection")]
    MissingDbConnection,

    #[error("missing api key")]
    MissingApiKey,

    #[error("missing process type")]
    MissingProcessType,

    #[error("invalid process type: {0}")]
    InvalidProcessType(String),

    #[error("invalid config file {path}: {message}")]
    ConfigFile { path: String, message: String },
}

impl ValidationError {
    /// Short machine-friendly reason, identical to the display text.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// A service env file could not be produced.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{service}: required env key {key} could not be resolved")]
    MissingKey { service: String, key: String },

    #[error("{service}: value for {key} contains a line break")]
    InvalidValue { service: String, key: String },

    #[error("failed to write env file {}: {message}", .path.display())]
    Write { path: PathBuf, message: String },
}

/// The shared network could not be ensured.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to inspect network {name}: {message}")]
    Inspect { name: String, message: String },

    #[error("failed to create network {name}: {message}")]
    Create { name: String, message: String },
}

/// A service could not be started.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("service {service} failed to start: {message}")]
    StartFailed { service: String, message: String },

    #[error("service {service} has no generated env file")]
    MissingEnv { service: String },

    #[error("service {service} depends on unknown service {dependency}")]
    UnknownDependency { service: String, dependency: String },

    #[error("dependency cycle between services: {}", .services.join(", "))]
    DependencyCycle { services: Vec<String> },
}

/// A service never became ready within its budget.
#[derive(Debug, Error)]
#[error("{service} not ready after {timeout:?}{}", .last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
pub struct TimeoutError {
    pub service: String,
    pub timeout: Duration,
    pub last_error: Option<String>,
}

/// The control plane (or the local agent service) rejected or never answered a request.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{endpoint} returned {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint} unreachable: {message}")]
    Unreachable { endpoint: String, message: String },

    #[error("{endpoint} returned an unexpected response: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

impl RegistrationError {
    /// HTTP status returned by the remote side, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistrationError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the request never reached the remote side.
    pub fn is_transport(&self) -> bool {
        matches!(self, RegistrationError::Unreachable { .. })
    }
}

/// Terminal error of a provisioning run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

impl ProvisionError {
    /// The stage this error originates from.
    ///
    /// Readiness timeouts always belong to `WAIT_READY`, even when they happen
    /// while waiting for a dependency during deployment.
    pub fn stage(&self) -> Stage {
        match self {
            ProvisionError::Validation(_) => Stage::Validate,
            ProvisionError::Generation(_) => Stage::GenerateEnv,
            ProvisionError::Network(_) => Stage::EnsureNetwork,
            ProvisionError::Deployment(_) => Stage::DeployServices,
            ProvisionError::Timeout(_) => Stage::WaitReady,
            ProvisionError::Registration(_) => Stage::RegisterAgent,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.stage().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_reasons() {
        assert_eq!(ValidationError::AmbiguousSource.reason(), "ambiguous source");
        assert_eq!(
            ValidationError::IncompleteDbConnection.reason(),
            "incomplete db connection"
        );
    }

    #[test]
    fn test_timeout_message_includes_last_error() {
        let err = TimeoutError {
            service: "index-service".to_string(),
            timeout: Duration::from_secs(3),
            last_error: Some("connection refused".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "index-service not ready after 3s: connection refused"
        );
    }

    #[test]
    fn test_registration_status() {
        let err = RegistrationError::Rejected {
            endpoint: "http://cp/api/v1/agents".to_string(),
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert_eq!(err.status(), Some(401));
        assert!(!err.is_transport());
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_stage_mapping() {
        let err: ProvisionError = ValidationError::MissingApiKey.into();
        assert_eq!(err.stage(), Stage::Validate);

        let err: ProvisionError = TimeoutError {
            service: "agent-service".to_string(),
            timeout: Duration::from_secs(1),
            last_error: None,
        }
        .into();
        assert_eq!(err.stage(), Stage::WaitReady);
        assert_eq!(err.exit_code(), Stage::WaitReady.exit_code());
    }
}
