//! Readiness probing of started services.

use std::time::Duration;

use anyhow::Context;

use crate::{
    TimeoutError,
    services::{ReadinessCheck, ServiceSpec},
    settings::ReadinessSettings,
};

/// Default timeout of a single probe request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Single readiness check against a started service.
#[allow(async_fn_in_trait)]
pub trait Probe {
    /// Returns `Ok(())` once the service answers its readiness check.
    async fn check(&self, service: &ServiceSpec) -> anyhow::Result<()>;
}

/// Create an HTTP client for readiness probes.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Probes the host-published health endpoint of a service.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpProbe {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: create_client(DEFAULT_REQUEST_TIMEOUT)?,
            host: "localhost".to_string(),
        })
    }

    /// Probe services on `host` instead of `localhost`.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn health_url(&self, port: u16, path: &str) -> String {
        format!("http://{}:{}{}", self.host, port, path)
    }
}

impl Probe for HttpProbe {
    async fn check(&self, service: &ServiceSpec) -> anyhow::Result<()> {
        let ReadinessCheck::Http { port, path } = service.readiness else {
            return Ok(());
        };

        let url = self.health_url(port, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{url} returned {status}");
        }

        Ok(())
    }
}

/// Time budget of readiness waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
}

impl From<&ReadinessSettings> for ReadinessPolicy {
    fn from(settings: &ReadinessSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            poll_interval: settings.poll_interval(),
            settle_delay: settings.settle_delay(),
        }
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::from(&ReadinessSettings::default())
    }
}

/// Wait until `service` is ready.
///
/// HTTP checks are polled every `poll_interval` until they succeed or
/// `timeout` elapses. Services without a health endpoint are given the
/// settle delay and then considered ready.
pub async fn wait_ready<P: Probe>(
    probe: &P,
    service: &ServiceSpec,
    policy: &ReadinessPolicy,
) -> Result<(), TimeoutError> {
    if service.readiness == ReadinessCheck::SettleDelay {
        tracing::debug!(service = service.name, delay = ?policy.settle_delay, "No health endpoint, waiting settle delay");
        tokio::time::sleep(policy.settle_delay).await;
        return Ok(());
    }

    let mut last_error = None;
    let poll = async {
        loop {
            match probe.check(service).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::trace!(error = %e, service = service.name, "Readiness check failed, retrying...");
                    last_error = Some(format!("{e:#}"));
                }
            }

            tokio::time::sleep(policy.poll_interval).await;
        }
    };

    let outcome = tokio::time::timeout(policy.timeout, poll).await;
    match outcome {
        Ok(()) => {
            tracing::debug!(service = service.name, "Service is ready");
            Ok(())
        }
        Err(_) => Err(TimeoutError {
            service: service.name.to_string(),
            timeout: policy.timeout,
            last_error,
        }),
    }
}
