//! Per-execution namespace tokens used as staging subdirectory names.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;

const TOKEN_BYTES: usize = 32;

/// Errors returned while generating a namespace token
#[derive(Debug, thiserror::Error)]
pub enum NamespaceError {
    #[error("failed to generate namespace: {0}")]
    Generation(String),
}

/// Supplies a fresh, collision-resistant token per execution.
pub trait NamespaceProvider: Send + Sync {
    fn get(&self) -> Result<String, NamespaceError>;
}

/// Random tokens of 32 bytes, URL-safe base64 encoded so they are valid
/// path segments.
#[derive(Debug, Default, Clone)]
pub struct RandomNamespaceProvider;

impl RandomNamespaceProvider {
    pub fn new() -> Self {
        Self
    }
}

impl NamespaceProvider for RandomNamespaceProvider {
    fn get(&self) -> Result<String, NamespaceError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng()
            .try_fill_bytes(&mut bytes)
            .map_err(|e| NamespaceError::Generation(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }
}

/// Always returns the same name. Only useful when executions never overlap.
#[derive(Debug, Clone)]
pub struct StaticNamespaceProvider {
    name: String,
}

impl StaticNamespaceProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl NamespaceProvider for StaticNamespaceProvider {
    fn get(&self) -> Result<String, NamespaceError> {
        Ok(self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_tokens_are_unique_path_segments() {
        let provider = RandomNamespaceProvider::new();
        let tokens: HashSet<String> = (0..1000).map(|_| provider.get().unwrap()).collect();

        assert_eq!(tokens.len(), 1000);
        for token in &tokens {
            assert_eq!(token.len(), 43);
            assert!(token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }

    #[test]
    fn test_static_provider() {
        let provider = StaticNamespaceProvider::new("fixed");
        assert_eq!(provider.get().unwrap(), "fixed");
        assert_eq!(provider.get().unwrap(), "fixed");
    }
}
