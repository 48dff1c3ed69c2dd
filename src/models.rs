//! Request and response models shared by the execution core and the API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A request to execute a code snippet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Wrap `code` into the spec's inline template before running it.
    #[serde(default)]
    pub inline_expression: bool,
}

/// Captured output of a finished execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "exectimems")]
    pub exec_time_ms: u64,
}

/// Identification of the isolation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxInfo {
    #[serde(rename = "type")]
    pub backend: String,
    pub version: String,
}

/// General information about the running deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version: String,
    pub sandbox: SandboxInfo,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            ..Default::default()
        }
    }
}
