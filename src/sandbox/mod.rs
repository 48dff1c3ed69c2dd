//! Sandboxed code execution.
//!
//! A [`Provider`] prepares execution images and creates [`Sandbox`] handles
//! for one isolation backend. The [`Manager`] drives a sandbox through its
//! lifecycle for every execution request:
//!
//! ```text
//! Created -> Started -> Running -> { Exited | Killed } -> Deleted
//! ```
//!
//! and guarantees teardown of the backend unit and the staged files, even
//! when the execution times out or is killed from outside.

pub mod docker;
pub mod inline;
pub mod manager;
pub mod output;
pub mod runspec;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::SandboxInfo;
use crate::spec::Spec;

pub use manager::Manager;
pub use output::{CappedBuffer, OutputCollector};
pub use runspec::RunSpec;

/// Sender half of an output stream. Every message is one chunk of bytes.
pub type OutputSender = mpsc::Sender<Vec<u8>>;

/// Receiver half of an output stream.
pub type OutputReceiver = mpsc::Receiver<Vec<u8>>;

/// Handle to one isolated execution unit.
#[async_trait]
pub trait Sandbox: Send + Sync + std::fmt::Debug {
    /// Unique ID of the sandbox.
    fn id(&self) -> &str;

    /// Attaches to the unit's output, starts it and forwards stdout and
    /// stderr chunks as they arrive.
    ///
    /// Returns when the unit exits, the output stream fails or `cancel`
    /// fires, whichever happens first. A non-zero exit of the executed code
    /// is not an error.
    async fn run(
        &self,
        cancel: CancellationToken,
        stdout: OutputSender,
        stderr: OutputSender,
    ) -> Result<(), SandboxError>;

    /// Returns true if the unit is still executing.
    async fn is_running(&self) -> Result<bool, SandboxError>;

    /// Stops the unit immediately.
    async fn kill(&self) -> Result<(), SandboxError>;

    /// Reclaims all backend resources of the unit.
    async fn delete(&self) -> Result<(), SandboxError>;
}

/// Factory and image manager for sandboxes of one isolation backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend identification for operational visibility.
    async fn info(&self) -> Result<SandboxInfo, SandboxError>;

    /// Makes the spec's image available locally. Skips the pull when the
    /// image is already present unless `force` is set.
    async fn prepare(&self, spec: &Spec, force: bool) -> Result<(), SandboxError>;

    /// Prepares the image and creates a sandbox for the run spec without
    /// starting it.
    async fn create_sandbox(&self, spec: &RunSpec) -> Result<Arc<dyn Sandbox>, SandboxError>;
}

/// Classification of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is invalid. Reported to the caller as a bad request.
    User,
    /// Infrastructure failure in staging, the backend or teardown.
    System,
    /// The execution exceeded its deadline.
    Timeout,
}

/// Errors in sandboxing operations
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("unsupported language spec: {0}")]
    UnsupportedLanguage(String),

    #[error("this spec has no support for inline expressions")]
    NoInlineSupport,

    #[error("code is empty")]
    EmptyCode,

    #[error("code execution timed out after {0:?}")]
    TimedOut(Duration),

    #[error("execution was cancelled")]
    Cancelled,

    #[error("staging failed: {0}")]
    Staging(String),

    #[error("invalid sandbox configuration: {0}")]
    Configuration(String),

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("{}", cleanup_message(.run, .errors))]
    Cleanup {
        /// Error of the execution itself, `None` if it ran fine.
        run: Option<Box<SandboxError>>,
        errors: Vec<SandboxError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::UnsupportedLanguage(_)
            | SandboxError::NoInlineSupport
            | SandboxError::EmptyCode => ErrorKind::User,
            SandboxError::TimedOut(_) => ErrorKind::Timeout,
            _ => ErrorKind::System,
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind() == ErrorKind::System
    }

    /// Returns true if the execution completed but tearing it down failed.
    pub fn ran_but_cleanup_failed(&self) -> bool {
        matches!(self, SandboxError::Cleanup { run: None, .. })
    }
}

fn cleanup_message(run: &Option<Box<SandboxError>>, errors: &[SandboxError]) -> String {
    let errors = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    match run {
        Some(run) => format!("{}; cleanup failed: {}", run, errors),
        None => format!("cleanup failed: {}", errors),
    }
}
