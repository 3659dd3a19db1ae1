//! The validated provisioning request and the types it is made of.

use serde::{Deserialize, Serialize};

/// Default PostgreSQL port used when the discrete connection fields omit one.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default step order when neither the config file nor the CLI provides one.
pub const DEFAULT_STEP_ORDER: i64 = 1;

/// Selects which pipeline stages apply to a run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessType {
    /// Deploy the full service stack, then register the agent.
    InitialProvisioningOrbit,
    /// Register an agent against services that are already running.
    CreateAgentOrbit,
}

impl ProcessType {
    /// Whether this process type needs an API key to be resolved.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProcessType::InitialProvisioningOrbit)
    }
}

/// Discrete database connection fields.
#[derive(Clone, PartialEq, Eq)]
pub struct DiscreteConnection {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DiscreteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscreteConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A database connection, given either as a full URI or as discrete fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseConnection {
    ConnectionString(String),
    Discrete(DiscreteConnection),
}

impl DatabaseConnection {
    /// The canonical connection string handed to every downstream consumer.
    ///
    /// Discrete fields are assembled into a `postgresql://` URI with the password
    /// form-encoded, so reserved characters survive the round trip.
    pub fn connection_string(&self) -> String {
        match self {
            DatabaseConnection::ConnectionString(uri) => uri.clone(),
            DatabaseConnection::Discrete(conn) => {
                let password = quote_plus(&conn.password);
                format!(
                    "postgresql://{}:{}@{}:{}/{}",
                    conn.username, password, conn.host, conn.port, conn.database
                )
            }
        }
    }
}

/// Form-encode `value` with only `_.-~` and alphanumerics left unescaped.
///
/// `form_urlencoded` keeps `*` and escapes `~`; consumers of the connection
/// string expect the opposite.
fn quote_plus(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('*', "%2A")
        .replace("%7E", "~")
}

/// Name and description of the agent to register.
///
/// Absent fields are omitted from the registration call; the control plane
/// applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentIdentity {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl AgentIdentity {
    /// Returns `None` when neither field is set.
    pub fn from_parts(name: Option<String>, description: Option<String>) -> Option<Self> {
        (name.is_some() || description.is_some()).then_some(Self { name, description })
    }
}

/// A fully resolved and validated provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub api_key: Option<String>,
    pub process_type: ProcessType,
    pub process_id: Option<String>,
    pub step_order: i64,
    pub jwt_token: Option<String>,
    pub db: DatabaseConnection,
    pub agent: Option<AgentIdentity>,
}

impl ProvisioningRequest {
    pub fn agent_name(&self) -> Option<&str> {
        self.agent.as_ref().and_then(|a| a.name.as_deref())
    }

    pub fn agent_description(&self) -> Option<&str> {
        self.agent.as_ref().and_then(|a| a.description.as_deref())
    }
}
