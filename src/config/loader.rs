//! Configuration loading and `.env` template generation.

use crate::config::{Config, ConfigError};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

/// Prefix of environment variables overriding configuration values.
pub const ENV_PREFIX: &str = "RUNNER";

/// Separator between nested keys in environment variable names.
pub const ENV_SEPARATOR: &str = "__";

const DEFAULT_CONFIG_NAME: &str = "config";

const ENV_HEADER: &str = "\
# Set the following variables to use a custom Docker daemon.
# DOCKER_HOST=\"\"
# DOCKER_CERT_PATH=\"\"
# DOCKER_TLS_VERIFY=\"\"";

/// Configuration loader
///
/// Layers built-in defaults, a config file and environment variables, later
/// sources taking precedence.
#[derive(Debug)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    default_name: String,
    env: Option<HashMap<String, String>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            path: None,
            default_name: DEFAULT_CONFIG_NAME.to_string(),
            env: None,
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base name (without extension) of the optional config file looked up
    /// when no explicit file is set. Defaults to `config`.
    pub fn with_default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    /// Use an explicit config file. Unlike the default location, it must exist.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Read overrides from the given map instead of the process environment.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<Config, ConfigError> {
        let defaults = config::Config::try_from(&Config::default())?;

        let file = match &self.path {
            Some(path) => config::File::from(path.clone()).required(true),
            None => config::File::with_name(&self.default_name).required(false),
        };

        let env = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(self.env.clone());

        let config: Config = config::Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;

        Ok(config)
    }
}

/// Writes every configurable key with its default value as a `.env` file.
pub fn write_env_template<W: Write>(w: &mut W) -> Result<(), ConfigError> {
    writeln!(w, "{}\n", ENV_HEADER)?;

    let defaults = serde_json::to_value(Config::default())?;
    for (key, value) in flatten("", &defaults) {
        writeln!(w, "{}_{}=\"{}\"", ENV_PREFIX, key, value)?;
    }
    Ok(())
}

fn flatten(prefix: &str, value: &serde_json::Value) -> Vec<(String, String)> {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .flat_map(|(key, value)| {
                let key = key.to_uppercase();
                let key = if prefix.is_empty() {
                    key
                } else {
                    format!("{}{}{}", prefix, ENV_SEPARATOR, key)
                };
                flatten(&key, value)
            })
            .collect(),
        serde_json::Value::String(s) => vec![(prefix.to_string(), s.clone())],
        other => vec![(prefix.to_string(), other.to_string())],
    }
}
