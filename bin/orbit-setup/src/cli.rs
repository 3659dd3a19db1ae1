use std::path::PathBuf;

use clap::Parser;
use orbit_deploy::CliArgs;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "orbit-setup")]
#[command(
    author,
    version,
    about = "Provision the Orbit agent stack and register an agent with the control plane"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "ORBIT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a JSON provisioning config file.
    ///
    /// Mutually exclusive with `--api-key` and the database flags.
    #[arg(short, long, alias = "conf", env = "ORBIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the operator settings file (TOML).
    ///
    /// If not provided, `Orbit.toml` in the current directory is used when present.
    #[arg(long, env = "ORBIT_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// API key authenticating the run against the control plane.
    #[arg(long, env = "ORBIT_API_KEY")]
    pub api_key: Option<String>,

    /// The process type: `initial_provisioning_orbit` or `create_agent_orbit`.
    ///
    /// Defaults to `initial_provisioning_orbit` when an API key is given.
    #[arg(long, env = "ORBIT_PROCESS_TYPE")]
    pub process_type: Option<String>,

    /// Identifier of the calling process, forwarded to the control plane.
    #[arg(long, env = "ORBIT_PROCESS_ID")]
    pub process_id: Option<String>,

    /// Position of this run in the calling process. Defaults to 1.
    #[arg(long, env = "ORBIT_STEP_ORDER")]
    pub step_order: Option<i64>,

    /// JWT sent as a bearer token to the control plane.
    #[arg(long, env = "ORBIT_JWT_TOKEN")]
    pub jwt_token: Option<String>,

    #[clap(flatten)]
    pub db: DbArgs,

    /// Name of the agent to register.
    #[arg(long, env = "ORBIT_AGENT_NAME")]
    pub agent_name: Option<String>,

    /// Description of the agent to register.
    #[arg(long, env = "ORBIT_AGENT_DESCRIPTION")]
    pub agent_description: Option<String>,
}

/// Target database, as a URI or as discrete fields.
#[derive(Debug, Clone, Parser)]
pub struct DbArgs {
    /// Full database connection URI.
    #[arg(long, env = "ORBIT_DB_CONNECTION_URI")]
    pub db_connection_uri: Option<String>,

    /// Database host.
    #[arg(long, env = "ORBIT_DB_HOST")]
    pub db_host: Option<String>,

    /// Database port. Defaults to 5432.
    #[arg(long, env = "ORBIT_DB_PORT")]
    pub db_port: Option<u16>,

    /// Database name.
    #[arg(long, env = "ORBIT_DB_NAME")]
    pub db_name: Option<String>,

    /// Database user.
    #[arg(long, env = "ORBIT_DB_USER")]
    pub db_user: Option<String>,

    /// Database password.
    #[arg(long, env = "ORBIT_DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,
}

impl Cli {
    /// The request parameters, for the resolver to validate.
    pub fn request_args(&self) -> CliArgs {
        CliArgs {
            api_key: self.api_key.clone(),
            process_type: self.process_type.clone(),
            process_id: self.process_id.clone(),
            step_order: self.step_order,
            jwt_token: self.jwt_token.clone(),
            db_connection_uri: self.db.db_connection_uri.clone(),
            db_host: self.db.db_host.clone(),
            db_port: self.db.db_port,
            db_name: self.db.db_name.clone(),
            db_user: self.db.db_user.clone(),
            db_password: self.db.db_password.clone(),
            agent_name: self.agent_name.clone(),
            agent_description: self.agent_description.clone(),
        }
    }
}
