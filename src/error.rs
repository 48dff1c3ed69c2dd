//! Top-level error type of the sandbox runner.
//!
//! Each module keeps its own error enum. [`RunnerError`] aggregates them for
//! the application bootstrap and the CLI.

use thiserror::Error;

/// Main error type that encompasses all possible errors in the system
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Spec error: {0}")]
    Spec(#[from] crate::spec::SpecError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("Invalid size: {0}")]
    Size(#[from] crate::size::SizeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("{failed} of {total} operations failed")]
    Aggregate { failed: usize, total: usize },
}

/// Result type alias for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

impl RunnerError {
    /// Returns true if the error was caused by the request rather than by
    /// the infrastructure.
    pub fn is_user_error(&self) -> bool {
        matches!(self, RunnerError::Sandbox(e) if e.kind() == crate::sandbox::ErrorKind::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxError;

    #[test]
    fn test_user_error_classification() {
        let err: RunnerError = SandboxError::EmptyCode.into();
        assert!(err.is_user_error());

        let err: RunnerError = SandboxError::Backend("daemon down".into()).into();
        assert!(!err.is_user_error());
        assert_eq!(err.to_string(), "Sandbox error: backend error: daemon down");
    }
}
