//! Configuration validation.

use crate::config::{Config, ConfigError};
use crate::size::parse_size;
use std::net::SocketAddr;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration validator
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate the complete configuration
    pub fn validate(&self, config: &Config) -> Result<(), ConfigError> {
        if config.spec_file.trim().is_empty() {
            return Err(invalid("spec_file", "must not be empty"));
        }
        if config.host_root_dir.trim().is_empty() {
            return Err(invalid("host_root_dir", "must not be empty"));
        }
        if !LOG_LEVELS.contains(&config.log.level.to_lowercase().as_str()) {
            return Err(invalid(
                "log.level",
                &format!("must be one of {}", LOG_LEVELS.join(", ")),
            ));
        }

        config
            .api
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|e| invalid("api.bind_address", &e.to_string()))?;
        validate_size("api.max_output_len", &config.api.max_output_len)?;

        if config.sandbox.timeout_seconds == 0 {
            return Err(invalid("sandbox.timeout_seconds", "must be greater than 0"));
        }
        validate_size("sandbox.memory", &config.sandbox.memory)?;
        validate_size("sandbox.stream_buffer_cap", &config.sandbox.stream_buffer_cap)?;

        Ok(())
    }
}

fn validate_size(field: &str, value: &str) -> Result<(), ConfigError> {
    parse_size(value)
        .map(|_| ())
        .map_err(|e| invalid(field, &e.to_string()))
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: Result<(), ConfigError>) -> String {
        match result {
            Err(ConfigError::Validation { field, .. }) => field,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConfigValidator::new().validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let validator = ConfigValidator::new();

        let mut config = Config::default();
        config.sandbox.memory = "lots".to_string();
        assert_eq!(field_of(validator.validate(&config)), "sandbox.memory");

        let mut config = Config::default();
        config.sandbox.timeout_seconds = 0;
        assert_eq!(field_of(validator.validate(&config)), "sandbox.timeout_seconds");

        let mut config = Config::default();
        config.api.bind_address = ":8080".to_string();
        assert_eq!(field_of(validator.validate(&config)), "api.bind_address");

        let mut config = Config::default();
        config.host_root_dir = " ".to_string();
        assert_eq!(field_of(validator.validate(&config)), "host_root_dir");

        let mut config = Config::default();
        config.log.level = "verbose".to_string();
        assert_eq!(field_of(validator.validate(&config)), "log.level");
    }
}
