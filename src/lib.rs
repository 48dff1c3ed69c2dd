// Sandbox Runner Library
//
// Executes code snippets of configurable languages inside isolated,
// resource-bounded containers and exposes them over HTTP and websockets.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod file;
pub mod models;
pub mod namespace;
pub mod sandbox;
pub mod scheduler;
pub mod size;
pub mod spec;
pub mod testing;

// Re-export commonly used types
pub use app::App;
pub use config::{Config, ConfigError, ConfigLoader};
pub use error::{RunnerError, RunnerResult};
pub use models::{ExecutionRequest, ExecutionResponse, SandboxInfo, SystemInfo};
pub use sandbox::{ErrorKind, Manager, Provider, Sandbox, SandboxError};
pub use spec::{Spec, SpecError, SpecRegistry};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
