//! Resolution of the provisioning request from a JSON config file or CLI parameters.

use std::{path::Path, str::FromStr};

use serde::Deserialize;

use crate::{
    AgentIdentity, DEFAULT_DB_PORT, DEFAULT_STEP_ORDER, DatabaseConnection, DiscreteConnection,
    ProcessType, ProvisioningRequest, ValidationError,
};

/// Request parameters given on the command line.
///
/// Every field is optional; the resolver decides which combinations are valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub api_key: Option<String>,
    pub process_type: Option<String>,
    pub process_id: Option<String>,
    pub step_order: Option<i64>,
    pub jwt_token: Option<String>,

    pub db_connection_uri: Option<String>,
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_name: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,

    pub agent_name: Option<String>,
    pub agent_description: Option<String>,
}

impl CliArgs {
    /// Whether the command line describes a request on its own.
    ///
    /// The API key and the database flags make the CLI a source. Agent
    /// identity, JWT and process selection flags may accompany a config file.
    pub fn is_source(&self) -> bool {
        [
            &self.api_key,
            &self.db_connection_uri,
            &self.db_host,
            &self.db_name,
            &self.db_user,
            &self.db_password,
        ]
        .iter()
        .any(|v| non_empty(v).is_some())
            || self.db_port.is_some()
    }
}

/// A JSON scalar that may be written as a string or a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
        }
    }
}

/// On-disk config file layout.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    process_type: Option<String>,
    #[serde(default)]
    process_id: Option<Scalar>,
    #[serde(default)]
    step_order: Option<i64>,
    #[serde(default)]
    data: ConfigData,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct ConfigData {
    #[serde(default)]
    jwt_token: Option<String>,
    #[serde(default)]
    orbit_configuration: OrbitConfiguration,
    #[serde(default)]
    agent: AgentSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct OrbitConfiguration {
    #[serde(default)]
    connection_string: Option<String>,
    #[serde(default)]
    db_connection: Option<DbConnectionSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct DbConnectionSection {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<Scalar>,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct AgentSection {
    #[serde(default)]
    agent_name: Option<String>,
    #[serde(default)]
    agent_description: Option<String>,
}

impl ConfigFile {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Read and parse the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ValidationError> {
        let config_error = |message: String| ValidationError::ConfigFile {
            path: path.display().to_string(),
            message,
        };

        let bytes = std::fs::read(path).map_err(|e| config_error(e.to_string()))?;
        Self::from_slice(&bytes).map_err(|e| config_error(e.to_string()))
    }

    fn into_raw(self, path: &Path) -> Result<RawRequest, ValidationError> {
        let ConfigFile {
            api_key,
            process_type,
            process_id,
            step_order,
            data,
        } = self;
        let db = data.orbit_configuration.db_connection.unwrap_or_default();

        let db_port = match db.port.map(Scalar::into_text) {
            Some(port) => Some(port.parse::<u16>().map_err(|_| ValidationError::ConfigFile {
                path: path.display().to_string(),
                message: format!("invalid db port: {port}"),
            })?),
            None => None,
        };

        Ok(RawRequest {
            api_key,
            process_type,
            process_id: process_id.map(Scalar::into_text),
            step_order,
            jwt_token: data.jwt_token,
            db_connection_uri: data.orbit_configuration.connection_string,
            db_host: db.host,
            db_port,
            db_name: db.database,
            db_user: db.username,
            db_password: db.password,
            agent_name: data.agent.agent_name,
            agent_description: data.agent.agent_description,
        })
    }
}

/// Unvalidated request fields, whatever their source.
#[derive(Debug, Default)]
struct RawRequest {
    api_key: Option<String>,
    process_type: Option<String>,
    process_id: Option<String>,
    step_order: Option<i64>,
    jwt_token: Option<String>,
    db_connection_uri: Option<String>,
    db_host: Option<String>,
    db_port: Option<u16>,
    db_name: Option<String>,
    db_user: Option<String>,
    db_password: Option<String>,
    agent_name: Option<String>,
    agent_description: Option<String>,
}

impl From<&CliArgs> for RawRequest {
    fn from(cli: &CliArgs) -> Self {
        Self {
            api_key: cli.api_key.clone(),
            process_type: cli.process_type.clone(),
            process_id: cli.process_id.clone(),
            step_order: cli.step_order,
            jwt_token: cli.jwt_token.clone(),
            db_connection_uri: cli.db_connection_uri.clone(),
            db_host: cli.db_host.clone(),
            db_port: cli.db_port,
            db_name: cli.db_name.clone(),
            db_user: cli.db_user.clone(),
            db_password: cli.db_password.clone(),
            agent_name: cli.agent_name.clone(),
            agent_description: cli.agent_description.clone(),
        }
    }
}

impl RawRequest {
    /// Apply the CLI flags allowed next to a config file.
    fn override_with(mut self, cli: &CliArgs) -> Self {
        self.process_type = non_empty(&cli.process_type).or(self.process_type);
        self.process_id = non_empty(&cli.process_id).or(self.process_id);
        self.step_order = cli.step_order.or(self.step_order);
        self.jwt_token = non_empty(&cli.jwt_token).or(self.jwt_token);
        self.agent_name = non_empty(&cli.agent_name).or(self.agent_name);
        self.agent_description = non_empty(&cli.agent_description).or(self.agent_description);
        self
    }

    fn database(&self) -> Result<DatabaseConnection, ValidationError> {
        let uri = non_empty(&self.db_connection_uri);
        let host = non_empty(&self.db_host);
        let name = non_empty(&self.db_name);
        let user = non_empty(&self.db_user);
        let password = non_empty(&self.db_password);

        let any_discrete = host.is_some()
            || name.is_some()
            || user.is_some()
            || password.is_some()
            || self.db_port.is_some();

        match (uri, any_discrete) {
            (Some(_), true) => Err(ValidationError::AmbiguousDbConnection),
            (Some(uri), false) => Ok(DatabaseConnection::ConnectionString(uri)),
            (None, false) => Err(ValidationError::MissingDbConnection),
            (None, true) => match (host, name, user, password) {
                (Some(host), Some(database), Some(username), Some(password)) => {
                    Ok(DatabaseConnection::Discrete(DiscreteConnection {
                        host,
                        port: self.db_port.unwrap_or(DEFAULT_DB_PORT),
                        database,
                        username,
                        password,
                    }))
                }
                _ => Err(ValidationError::IncompleteDbConnection),
            },
        }
    }

    /// `from_cli` is set when the command line is the request source; only then
    /// does an API key imply initial provisioning.
    fn validate(self, from_cli: bool) -> Result<ProvisioningRequest, ValidationError> {
        let db = self.database()?;
        let api_key = non_empty(&self.api_key);

        let process_type = match non_empty(&self.process_type) {
            Some(raw) => ProcessType::from_str(&raw)
                .map_err(|_| ValidationError::InvalidProcessType(raw))?,
            None if from_cli && api_key.is_some() => ProcessType::InitialProvisioningOrbit,
            None => return Err(ValidationError::MissingProcessType),
        };

        if process_type.requires_api_key() && api_key.is_none() {
            return Err(ValidationError::MissingApiKey);
        }

        Ok(ProvisioningRequest {
            api_key,
            process_type,
            process_id: non_empty(&self.process_id),
            step_order: self.step_order.unwrap_or(DEFAULT_STEP_ORDER),
            jwt_token: non_empty(&self.jwt_token),
            db,
            agent: AgentIdentity::from_parts(
                non_empty(&self.agent_name),
                non_empty(&self.agent_description),
            ),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

/// Merge the config file (if any) and the CLI parameters into a validated request.
///
/// Exactly one of them must describe the request. Pure apart from reading the
/// config file: the same inputs always resolve to the same request or error.
pub fn resolve(
    config_file: Option<&Path>,
    cli: &CliArgs,
) -> Result<ProvisioningRequest, ValidationError> {
    let request = match (config_file, cli.is_source()) {
        (Some(_), true) | (None, false) => return Err(ValidationError::AmbiguousSource),
        (Some(path), false) => ConfigFile::load(path)?
            .into_raw(path)?
            .override_with(cli)
            .validate(false)?,
        (None, true) => RawRequest::from(cli).validate(true)?,
    };

    tracing::debug!(
        process_type = %request.process_type,
        process_id = ?request.process_id,
        step_order = request.step_order,
        "Provisioning request resolved"
    );

    Ok(request)
}
