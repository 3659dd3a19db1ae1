//! Agent registration against the local agent service and the remote control plane.

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    ProcessType, ProvisioningRequest, RegistrationError,
    settings::{AgentServiceSettings, RegistrySettings},
};

/// Alias of the database connection created on the agent service.
pub const DB_CONNECTION_ALIAS: &str = "orbit";

/// Header carrying the operator API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

const DATABASE_CONNECTIONS_PATH: &str = "/api/v1/database-connections";
const REFRESH_TABLES_PATH: &str = "/api/v1/table-descriptions/refresh";
const SYNC_SCHEMAS_PATH: &str = "/api/v1/table-descriptions/sync-schemas";

/// The agent record returned by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Identifier assigned by the control plane. Numeric ids are kept as text.
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Any other field of the response.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(id_to_string))
}

#[derive(Debug, Serialize)]
struct CreateConnectionBody<'a> {
    alias: &'a str,
    connection_uri: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct CreatedConnection {
    #[serde(default)]
    id: Value,
}

#[derive(Debug, Deserialize)]
struct TableDescription {
    id: Value,
}

#[derive(Debug, Serialize)]
struct LlmConfig<'a> {
    #[serde(rename = "model-family")]
    model_family: &'a str,
    #[serde(rename = "model-name")]
    model_name: &'a str,
}

#[derive(Debug, Serialize)]
struct SyncSchemasBody<'a> {
    table_description_ids: Vec<Value>,
    instruction: &'a str,
    llm_config: LlmConfig<'a>,
}

/// Body of both control-plane calls.
#[derive(Debug, Serialize)]
struct RegistrationBody<'a> {
    process_type: ProcessType,
    #[serde(skip_serializing_if = "Option::is_none")]
    process_id: Option<&'a str>,
    step_order: i64,
    connection_string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_connection_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_description: Option<&'a str>,
}

/// Registers agents. Performs no retries of its own.
#[derive(Debug, Clone)]
pub struct AgentRegistrar {
    client: reqwest::Client,
    registry: RegistrySettings,
    agent_service: AgentServiceSettings,
}

impl AgentRegistrar {
    pub fn new(
        registry: RegistrySettings,
        agent_service: AgentServiceSettings,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(registry.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            registry,
            agent_service,
        })
    }

    /// Register the agent described by `request`.
    ///
    /// Initial provisioning first wires the freshly deployed agent service to
    /// the database, then calls the full provisioning endpoint. Agent creation
    /// only calls the agent endpoint.
    pub async fn register(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<AgentRecord, RegistrationError> {
        let database_connection_id = match request.process_type {
            ProcessType::InitialProvisioningOrbit => Some(
                self.bootstrap_agent_service(&request.db.connection_string())
                    .await?,
            ),
            ProcessType::CreateAgentOrbit => None,
        };

        self.submit(request, database_connection_id).await
    }

    /// The control-plane call alone: the provisioning endpoint for initial
    /// provisioning, the agent endpoint otherwise.
    pub async fn submit(
        &self,
        request: &ProvisioningRequest,
        database_connection_id: Option<String>,
    ) -> Result<AgentRecord, RegistrationError> {
        let path = match request.process_type {
            ProcessType::InitialProvisioningOrbit => &self.registry.provision_path,
            ProcessType::CreateAgentOrbit => &self.registry.agent_path,
        };

        let endpoint = join_url(&self.registry.base_url, path);
        let body = RegistrationBody {
            process_type: request.process_type,
            process_id: request.process_id.as_deref(),
            step_order: request.step_order,
            connection_string: request.db.connection_string(),
            database_connection_id,
            agent_name: request.agent_name(),
            agent_description: request.agent_description(),
        };

        let mut builder = self.client.post(&endpoint).json(&body);
        if let Some(api_key) = &request.api_key {
            builder = builder.header(API_KEY_HEADER, api_key);
        }
        if let Some(jwt) = &request.jwt_token {
            builder = builder.bearer_auth(jwt);
        }

        tracing::info!(endpoint, process_type = %request.process_type, "Registering agent");
        let record: AgentRecord = send_json(builder, &endpoint).await?;
        tracing::info!(agent_id = ?record.id, "Agent registered");

        Ok(record)
    }

    /// Create the database connection on the agent service, refresh its table
    /// descriptions and sync their schemas. Returns the connection id.
    pub async fn bootstrap_agent_service(
        &self,
        connection_uri: &str,
    ) -> Result<String, RegistrationError> {
        let endpoint = join_url(&self.agent_service.url, DATABASE_CONNECTIONS_PATH);
        tracing::debug!(endpoint, "Creating database connection on agent service");
        let created: CreatedConnection = send_json(
            self.client.post(&endpoint).json(&CreateConnectionBody {
                alias: DB_CONNECTION_ALIAS,
                connection_uri,
            }),
            &endpoint,
        )
        .await?;

        let connection_id =
            id_to_string(&created.id).ok_or_else(|| RegistrationError::InvalidResponse {
                endpoint: endpoint.clone(),
                message: "missing database connection id".to_string(),
            })?;

        let endpoint = join_url(&self.agent_service.url, REFRESH_TABLES_PATH);
        let tables: Vec<TableDescription> = send_json(
            self.client
                .post(&endpoint)
                .query(&[("database_connection_id", connection_id.as_str())]),
            &endpoint,
        )
        .await?;
        tracing::info!(connection_id, tables = tables.len(), "Table descriptions refreshed");

        let endpoint = join_url(&self.agent_service.url, SYNC_SCHEMAS_PATH);
        let _: Value = send_json(
            self.client.post(&endpoint).json(&SyncSchemasBody {
                table_description_ids: tables.into_iter().map(|t| t.id).collect(),
                instruction: "",
                llm_config: LlmConfig {
                    model_family: &self.agent_service.model_family,
                    model_name: &self.agent_service.model_name,
                },
            }),
            &endpoint,
        )
        .await?;

        Ok(connection_id)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Send the request and decode its JSON body. An empty body decodes as `T::default()`.
async fn send_json<T: DeserializeOwned + Default>(
    builder: reqwest::RequestBuilder,
    endpoint: &str,
) -> Result<T, RegistrationError> {
    let response = builder
        .send()
        .await
        .map_err(|e| RegistrationError::Unreachable {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| RegistrationError::Unreachable {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

    if !status.is_success() {
        return Err(RegistrationError::Rejected {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    if body.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&body).map_err(|e| RegistrationError::InvalidResponse {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}
