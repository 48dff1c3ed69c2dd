//! Configuration management for the sandbox runner.
//!
//! Settings are layered from built-in defaults, an optional config file and
//! `RUNNER_`-prefixed environment variables (see [`loader::ConfigLoader`]).

pub mod loader;
pub mod validation;

use serde::{Deserialize, Serialize};

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    /// Local path or `http(s)://` URL of the spec document.
    pub spec_file: String,
    /// Host directory under which per-execution staging directories are created.
    pub host_root_dir: String,
    pub skip_startup_prep: bool,
    pub log: LogConfig,
    pub api: ApiConfig,
    pub sandbox: SandboxConfig,
    pub scheduler: SchedulerConfig,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

/// HTTP API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
    /// Maximum combined stdout + stderr length returned to a caller.
    pub max_output_len: String,
    pub cors_enabled: bool,
}

/// Sandbox backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// OCI runtime passed to the container engine. Empty uses the engine default.
    pub runtime: String,
    pub enable_networking: bool,
    pub memory: String,
    pub timeout_seconds: u64,
    /// Cap of each output stream buffer while collecting execution output.
    pub stream_buffer_cap: String,
}

/// Periodic job settings. An interval of `0` disables the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub update_images_secs: u64,
    pub update_specs_secs: u64,
}

/// Errors that can occur during configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Validation failed: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read access to the active configuration.
pub trait ConfigProvider: Send + Sync {
    fn config(&self) -> &Config;
}

impl ConfigProvider for Config {
    fn config(&self) -> &Config {
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            spec_file: "spec/spec.yaml".to_string(),
            host_root_dir: "/var/opt/sandbox-runner".to_string(),
            skip_startup_prep: false,
            log: LogConfig::default(),
            api: ApiConfig::default(),
            sandbox: SandboxConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_output_len: "1M".to_string(),
            cors_enabled: true,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: String::new(),
            enable_networking: false,
            memory: "100M".to_string(),
            timeout_seconds: 20,
            stream_buffer_cap: "50M".to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }
}
