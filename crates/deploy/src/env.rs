//! Per-service env file generation.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::{
    GenerationError, ProvisioningRequest, fs::FsHandler, services::ServiceSpec,
    settings::StackSettings,
};

/// Application identity shared by every service of the stack.
pub const APP_NAME: &str = "orbit";

/// Rendered environment of one service.
///
/// Keys are kept sorted so rendering is byte-for-byte deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    vars: BTreeMap<String, String>,
}

impl EnvFile {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `KEY=value` lines, one per variable, sorted by key.
    pub fn render(&self) -> String {
        self.vars
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect()
    }

    /// The variables in the `KEY=value` form the container runtime expects.
    pub fn to_env_vec(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect()
    }
}

/// Renders and writes the env files of the stack services.
pub struct EnvFileGenerator<'a> {
    settings: &'a StackSettings,
}

impl<'a> EnvFileGenerator<'a> {
    pub fn new(settings: &'a StackSettings) -> Self {
        Self { settings }
    }

    /// Build the env file of `service` for `request`.
    ///
    /// Fails if one of the service's required keys has no value, or if a value
    /// would break the line-oriented file format.
    pub fn generate(
        &self,
        request: &ProvisioningRequest,
        service: &ServiceSpec,
    ) -> Result<EnvFile, GenerationError> {
        let mut vars = BTreeMap::new();
        vars.insert("APP_NAME".to_string(), APP_NAME.to_string());
        vars.insert("APP_SERVICE".to_string(), service.name.to_string());

        for (key, value) in service.env_vars(request, self.settings) {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };

            if value.contains(['\n', '\r']) {
                return Err(GenerationError::InvalidValue {
                    service: service.name.to_string(),
                    key: key.to_string(),
                });
            }

            vars.insert(key.to_string(), value);
        }

        if let Some(missing) = service
            .required_env_keys
            .iter()
            .find(|key| !vars.contains_key(**key))
        {
            return Err(GenerationError::MissingKey {
                service: service.name.to_string(),
                key: missing.to_string(),
            });
        }

        Ok(EnvFile { vars })
    }

    /// Well-known location of the env file of `service`.
    pub fn path_for(&self, service: &ServiceSpec) -> PathBuf {
        env_file_path(&self.settings.env_dir(), service.name)
    }

    /// Write `env` to the well-known path of `service`, replacing any prior file.
    pub fn write(&self, service: &ServiceSpec, env: &EnvFile) -> Result<PathBuf, GenerationError> {
        let path = self.path_for(service);

        FsHandler::replace_file(&path, &env.render()).map_err(|e| GenerationError::Write {
            path: path.clone(),
            message: format!("{e:#}"),
        })?;

        tracing::debug!(service = service.name, path = %path.display(), vars = env.len(), "Env file written");

        Ok(path)
    }
}

/// `<dir>/.env.<service>`
pub fn env_file_path(dir: &Path, service: &str) -> PathBuf {
    dir.join(format!(".env.{service}"))
}
