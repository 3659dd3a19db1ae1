//! orbit-setup provisions the Orbit agent stack and registers an agent with the control plane.

mod cli;
mod summary;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cli::Cli;
use orbit_deploy::{
    ContainerRuntime, HttpProbe, NoRuntime, Orchestrator, OrbitDocker, ProvisioningRequest,
    ProvisioningResult, Stage, StackSettings,
};

/// Exit code for failures outside the pipeline (settings, Docker client).
const SETUP_FAILURE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("Setup failed: {e:#}");
            ExitCode::from(SETUP_FAILURE)
        }
    }
}

/// Validate the request before settings or Docker are touched, so bad input
/// always ends at `VALIDATE`.
async fn run(cli: Cli) -> Result<u8> {
    tracing::info!(stage = %Stage::Validate, "Stage started");
    let request = match orbit_deploy::resolve(cli.config.as_deref(), &cli.request_args()) {
        Ok(request) => request,
        Err(e) => return Ok(report(ProvisioningResult::failed(e))),
    };

    let settings = StackSettings::load(cli.settings.as_ref())?;

    tracing::info!(
        network = %settings.network_name,
        outdata = %settings.outdata.display(),
        registry = %settings.registry.base_url,
        process_type = %request.process_type,
        "Starting provisioning..."
    );

    let result = if Stage::DeployServices.applies_to(request.process_type) {
        provision(&OrbitDocker::connect()?, settings, request).await?
    } else {
        provision(&NoRuntime, settings, request).await?
    };

    Ok(report(result))
}

async fn provision<R: ContainerRuntime>(
    runtime: &R,
    settings: StackSettings,
    request: ProvisioningRequest,
) -> Result<ProvisioningResult> {
    let probe = HttpProbe::new()?;
    let orchestrator = Orchestrator::new(runtime, &probe, settings)?;
    Ok(orchestrator.provision(request).await)
}

fn report(result: ProvisioningResult) -> u8 {
    println!("{}", summary::render(&result));
    result.exit_code()
}
