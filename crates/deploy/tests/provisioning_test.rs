//! Pipeline tests for orbit-deploy.
//!
//! The container runtime and the readiness probe are replaced by in-memory
//! fakes, and the control plane by a wiremock server, so these tests need
//! neither Docker nor network access.
//! Run with: cargo test --test provisioning_test

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use orbit_deploy::{
    CliArgs, ContainerRuntime, EnvFile, Orchestrator, Probe, ProcessType, ProvisionError,
    ProvisioningResult, RegistrationError, RuntimeError, ServiceHandler, Stage, StackSettings,
    ValidationError, services::ServiceSpec,
};
use tempdir::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

type EventLog = Arc<Mutex<Vec<String>>>;

/// In-memory container runtime.
#[derive(Default)]
struct FakeRuntime {
    networks: Mutex<BTreeSet<String>>,
    /// Running containers by name, with the env they were started with.
    running: Mutex<BTreeMap<String, EnvFile>>,
    events: EventLog,
}

impl FakeRuntime {
    fn with_log(events: EventLog) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    fn is_untouched(&self) -> bool {
        self.networks.lock().unwrap().is_empty() && self.running.lock().unwrap().is_empty()
    }
}

impl ContainerRuntime for FakeRuntime {
    async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.networks.lock().unwrap().contains(name))
    }

    async fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        if !self.networks.lock().unwrap().insert(name.to_string()) {
            return Err(RuntimeError::AlreadyExists(name.to_string()));
        }
        self.events.lock().unwrap().push(format!("network:{name}"));
        Ok(())
    }

    async fn start_service(
        &self,
        spec: &ServiceSpec,
        env: &EnvFile,
        network: &str,
    ) -> Result<ServiceHandler, RuntimeError> {
        if !self.networks.lock().unwrap().contains(network) {
            return Err(RuntimeError::Api(format!("network {network} not found")));
        }

        let container_name = spec.container_name();
        let reused = self
            .running
            .lock()
            .unwrap()
            .insert(container_name.clone(), env.clone())
            .is_some();
        if !reused {
            self.events
                .lock()
                .unwrap()
                .push(format!("start:{}", spec.name));
        }

        Ok(ServiceHandler {
            service: spec.name.to_string(),
            container_id: format!("id-{container_name}"),
            container_name,
            reused,
        })
    }
}

/// Probe that reports every service ready except the listed ones.
struct ScriptedProbe {
    never_ready: HashSet<&'static str>,
    events: EventLog,
}

impl Probe for ScriptedProbe {
    async fn check(&self, service: &ServiceSpec) -> anyhow::Result<()> {
        if self.never_ready.contains(service.name) {
            anyhow::bail!("connection refused");
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("ready:{}", service.name));
        Ok(())
    }
}

/// Shared test setup: temporary output directory and a mock control plane.
struct TestContext {
    dir: TempDir,
    server: MockServer,
    events: EventLog,
}

impl TestContext {
    async fn new() -> Self {
        Self {
            dir: TempDir::new("orbit-provisioning").unwrap(),
            server: MockServer::start().await,
            events: EventLog::default(),
        }
    }

    fn settings(&self) -> StackSettings {
        let mut settings = StackSettings::default();
        settings.outdata = self.dir.path().join("outdata");
        settings.network_name = "orbit_test_network".to_string();
        settings.readiness.timeout_secs = 1;
        settings.readiness.poll_interval_ms = 10;
        settings.readiness.settle_delay_secs = 0;
        settings.registry.base_url = self.server.uri();
        settings.agent_service.url = self.server.uri();
        settings.env.encrypt_key = Some("test-encrypt-key".to_string());
        settings
    }

    fn runtime(&self) -> FakeRuntime {
        FakeRuntime::with_log(self.events.clone())
    }

    fn probe(&self, never_ready: &[&'static str]) -> ScriptedProbe {
        ScriptedProbe {
            never_ready: never_ready.iter().copied().collect(),
            events: self.events.clone(),
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn env_dir(&self) -> PathBuf {
        self.dir.path().join("outdata").join("docker")
    }

    fn write_config(&self, content: &str) -> PathBuf {
        let path = self.dir.path().join("config.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Mount the agent-service bootstrap endpoints, expecting `connections`
    /// database connections to be created.
    async fn mount_agent_service(&self, connections: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v1/database-connections"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 1})))
            .expect(connections)
            .mount(&self.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/table-descriptions/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"id": "t1"}])))
            .mount(&self.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/table-descriptions/sync-schemas"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.server)
            .await;
    }

    async fn mount_provision(&self, status: u16, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v1/orbit/provision"))
            .respond_with(
                ResponseTemplate::new(status).set_body_json(serde_json::json!({"id": "agent-1"})),
            )
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }
}

fn initial_cli() -> CliArgs {
    CliArgs {
        api_key: Some("orbit-api-key".to_string()),
        db_connection_uri: Some("postgresql://orbit:pw@db.internal:5432/sales".to_string()),
        agent_name: Some("sales-agent".to_string()),
        ..Default::default()
    }
}

fn assert_failed_at(result: &ProvisioningResult, stage: Stage) {
    assert!(!result.succeeded(), "run unexpectedly succeeded");
    assert_eq!(result.stage_reached, stage);
    assert_eq!(result.exit_code(), stage.exit_code());
    assert_ne!(result.exit_code(), 0);
}

#[tokio::test]
async fn test_create_agent_from_config_skips_deployment() {
    let ctx = TestContext::new().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 42})))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let config = ctx.write_config(
        r#"{
            "process_type": "create_agent_orbit",
            "data": {
                "orbit_configuration": {"connection_string": "postgresql://u:p@db:5432/sales"},
                "agent": {"agent_name": "sales-agent"}
            }
        }"#,
    );

    let runtime = ctx.runtime();
    let probe = ctx.probe(&[]);
    let orchestrator = Orchestrator::new(&runtime, &probe, ctx.settings()).unwrap();
    let result = orchestrator.run(Some(&config), &CliArgs::default()).await;

    assert!(result.succeeded(), "unexpected failure: {:?}", result.error);
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.completed, vec![Stage::Validate, Stage::RegisterAgent]);
    assert_eq!(
        result.request.as_ref().map(|r| r.process_type),
        Some(ProcessType::CreateAgentOrbit)
    );
    assert_eq!(
        result.agent.as_ref().and_then(|a| a.id.as_deref()),
        Some("42")
    );
    assert!(runtime.is_untouched());
    assert!(!ctx.env_dir().exists());
}

#[tokio::test]
async fn test_config_with_api_key_flag_is_ambiguous() {
    let ctx = TestContext::new().await;
    let config = ctx.write_config(r#"{"api_key": "k"}"#);
    let cli = CliArgs {
        api_key: Some("orbit-api-key".to_string()),
        ..Default::default()
    };

    let runtime = ctx.runtime();
    let probe = ctx.probe(&[]);
    let orchestrator = Orchestrator::new(&runtime, &probe, ctx.settings()).unwrap();
    let result = orchestrator.run(Some(&config), &cli).await;

    assert_failed_at(&result, Stage::Validate);
    match &result.error {
        Some(ProvisionError::Validation(err)) => assert_eq!(err.reason(), "ambiguous source"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(runtime.is_untouched());
    assert!(!ctx.env_dir().exists());
}

#[tokio::test]
async fn test_incomplete_db_flags_fail_validation() {
    let ctx = TestContext::new().await;
    let cli = CliArgs {
        api_key: Some("orbit-api-key".to_string()),
        db_host: Some("db.internal".to_string()),
        db_user: Some("orbit".to_string()),
        db_password: Some("pw".to_string()),
        ..Default::default()
    };

    let runtime = ctx.runtime();
    let probe = ctx.probe(&[]);
    let orchestrator = Orchestrator::new(&runtime, &probe, ctx.settings()).unwrap();
    let result = orchestrator.run(None, &cli).await;

    assert_failed_at(&result, Stage::Validate);
    assert!(matches!(
        result.error,
        Some(ProvisionError::Validation(ValidationError::IncompleteDbConnection))
    ));
    assert!(runtime.is_untouched());
}

#[tokio::test]
async fn test_index_never_ready_fails_at_wait_ready() {
    let ctx = TestContext::new().await;
    ctx.mount_provision(200, 0).await;

    let runtime = ctx.runtime();
    let probe = ctx.probe(&["index-service"]);
    let orchestrator = Orchestrator::new(&runtime, &probe, ctx.settings()).unwrap();
    let result = orchestrator.run(None, &initial_cli()).await;

    assert_failed_at(&result, Stage::WaitReady);
    match &result.error {
        Some(ProvisionError::Timeout(err)) => {
            assert_eq!(err.service, "index-service");
            assert_eq!(err.last_error.as_deref(), Some("connection refused"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let events = ctx.events();
    assert!(events.contains(&"start:index-service".to_string()));
    assert!(!events.contains(&"start:agent-service".to_string()));
    assert!(!events.contains(&"start:worker-service".to_string()));
    assert!(result.agent.is_none());
}

#[tokio::test]
async fn test_registration_rejected_fails_at_register_agent() {
    let ctx = TestContext::new().await;
    ctx.mount_agent_service(1).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orbit/provision"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let runtime = ctx.runtime();
    let probe = ctx.probe(&[]);
    let orchestrator = Orchestrator::new(&runtime, &probe, ctx.settings()).unwrap();
    let result = orchestrator.run(None, &initial_cli()).await;

    assert_failed_at(&result, Stage::RegisterAgent);
    match &result.error {
        Some(ProvisionError::Registration(err @ RegistrationError::Rejected { body, .. })) => {
            assert_eq!(err.status(), Some(401));
            assert_eq!(body, "invalid api key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(result.services.len(), 3);
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let ctx = TestContext::new().await;
    ctx.mount_agent_service(1).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orbit/provision"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let mut settings = ctx.settings();
    settings.registry.retries = 2;
    settings.registry.retry_delay_ms = 10;

    let runtime = ctx.runtime();
    let probe = ctx.probe(&[]);
    let orchestrator = Orchestrator::new(&runtime, &probe, settings).unwrap();
    let result = orchestrator.run(None, &initial_cli()).await;

    assert_failed_at(&result, Stage::RegisterAgent);
    assert!(matches!(
        result.error,
        Some(ProvisionError::Registration(RegistrationError::Rejected { status: 401, .. }))
    ));
}

#[tokio::test]
async fn test_unreachable_control_plane_is_retried_without_repeating_bootstrap() {
    let ctx = TestContext::new().await;
    ctx.mount_agent_service(1).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orbit/provision"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(3)
        .mount(&ctx.server)
        .await;

    let mut settings = ctx.settings();
    settings.registry.retries = 2;
    settings.registry.retry_delay_ms = 10;
    settings.registry.request_timeout_secs = 1;

    let runtime = ctx.runtime();
    let probe = ctx.probe(&[]);
    let orchestrator = Orchestrator::new(&runtime, &probe, settings).unwrap();
    let result = orchestrator.run(None, &initial_cli()).await;

    assert_failed_at(&result, Stage::RegisterAgent);
    match &result.error {
        Some(ProvisionError::Registration(err)) => assert!(err.is_transport(), "{err}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(result.agent.is_none());
}

#[tokio::test]
async fn test_initial_provisioning_runs_every_stage() {
    let ctx = TestContext::new().await;
    ctx.mount_agent_service(1).await;
    ctx.mount_provision(200, 1).await;

    let runtime = ctx.runtime();
    let probe = ctx.probe(&[]);
    let orchestrator = Orchestrator::new(&runtime, &probe, ctx.settings()).unwrap();
    let result = orchestrator.run(None, &initial_cli()).await;

    assert!(result.succeeded(), "unexpected failure: {:?}", result.error);
    assert_eq!(
        result.completed,
        vec![
            Stage::Validate,
            Stage::GenerateEnv,
            Stage::EnsureNetwork,
            Stage::DeployServices,
            Stage::WaitReady,
            Stage::RegisterAgent,
        ]
    );

    assert_eq!(result.env_files.len(), 3);
    for service in ["index-service", "agent-service", "worker-service"] {
        assert!(ctx.env_dir().join(format!(".env.{service}")).exists());
    }
    let worker_env =
        std::fs::read_to_string(ctx.env_dir().join(".env.worker-service")).unwrap();
    assert!(worker_env.contains("ORBIT_API_KEY=orbit-api-key\n"));

    assert_eq!(
        ctx.events(),
        vec![
            "network:orbit_test_network",
            "start:index-service",
            "ready:index-service",
            "start:agent-service",
            "ready:agent-service",
            "start:worker-service",
        ]
    );
}

#[tokio::test]
async fn test_rerun_reuses_network_and_containers() {
    let ctx = TestContext::new().await;
    ctx.mount_agent_service(2).await;
    ctx.mount_provision(200, 2).await;

    let runtime = ctx.runtime();
    let probe = ctx.probe(&[]);
    let orchestrator = Orchestrator::new(&runtime, &probe, ctx.settings()).unwrap();

    let first = orchestrator.run(None, &initial_cli()).await;
    let second = orchestrator.run(None, &initial_cli()).await;

    assert!(first.succeeded() && second.succeeded());
    assert_eq!(runtime.networks.lock().unwrap().len(), 1);
    assert_eq!(runtime.running.lock().unwrap().len(), 3);
    assert!(second.services.iter().all(|s| s.reused));

    let starts = ctx
        .events()
        .iter()
        .filter(|e| e.starts_with("start:"))
        .count();
    assert_eq!(starts, 3);
}

#[tokio::test]
async fn test_missing_encrypt_key_fails_generation_without_files() {
    let ctx = TestContext::new().await;
    let mut settings = ctx.settings();
    settings.env.encrypt_key = None;

    let runtime = ctx.runtime();
    let probe = ctx.probe(&[]);
    let orchestrator = Orchestrator::new(&runtime, &probe, settings).unwrap();
    let result = orchestrator.run(None, &initial_cli()).await;

    assert_failed_at(&result, Stage::GenerateEnv);
    assert!(result.env_files.is_empty());
    assert!(!ctx.env_dir().exists());
    assert!(runtime.is_untouched());
}

#[tokio::test]
async fn test_dependencies_ready_before_dependents_start() {
    let ctx = TestContext::new().await;
    ctx.mount_agent_service(1).await;
    ctx.mount_provision(200, 1).await;

    let runtime = ctx.runtime();
    let probe = ctx.probe(&[]);
    let orchestrator = Orchestrator::new(&runtime, &probe, ctx.settings()).unwrap();
    let services: Vec<ServiceSpec> = orchestrator_services(&ctx);

    let result = orchestrator.run(None, &initial_cli()).await;
    assert!(result.succeeded(), "unexpected failure: {:?}", result.error);

    let events = ctx.events();
    let position = |event: String| events.iter().position(|e| *e == event).unwrap();
    for service in &services {
        for dependency in service.depends_on {
            assert!(
                position(format!("ready:{dependency}")) < position(format!("start:{}", service.name)),
                "{} started before {dependency} was ready",
                service.name
            );
        }
    }
}

fn orchestrator_services(ctx: &TestContext) -> Vec<ServiceSpec> {
    orbit_deploy::services::catalog(&ctx.settings().images)
}
