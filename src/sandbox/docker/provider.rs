use async_trait::async_trait;
use bollard::container::{Config as ContainerConfig, CreateContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::sandbox::DockerSandbox;
use super::{container_name, split_image, BACKEND_TYPE};
use crate::config::ConfigProvider;
use crate::models::SandboxInfo;
use crate::sandbox::{Provider, RunSpec, Sandbox, SandboxError};
use crate::size::parse_size;
use crate::spec::Spec;

/// [`Provider`] creating one Docker container per execution.
#[derive(Clone)]
pub struct DockerProvider {
    docker: Docker,
    config: Arc<dyn ConfigProvider>,
}

impl DockerProvider {
    /// Connects with the local defaults, honouring `DOCKER_HOST`.
    pub fn new(config: Arc<dyn ConfigProvider>) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::with_client(docker, config))
    }

    pub fn with_client(docker: Docker, config: Arc<dyn ConfigProvider>) -> Self {
        Self { docker, config }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn container_config(&self, spec: &RunSpec) -> Result<ContainerConfig<String>, SandboxError> {
        let cfg = &self.config.config().sandbox;

        let memory = parse_size(&cfg.memory)
            .map_err(|e| SandboxError::Configuration(format!("sandbox.memory: {}", e)))?;
        let memory = match memory {
            0 => None,
            n => Some(i64::try_from(n).map_err(|_| {
                SandboxError::Configuration(format!("sandbox.memory: {} is too large", cfg.memory))
            })?),
        };

        let work_dir = spec.work_dir();
        let host_dir = absolute(&spec.assembled_host_dir())?;
        let runtime = if cfg.runtime.is_empty() {
            None
        } else {
            Some(cfg.runtime.clone())
        };

        Ok(ContainerConfig {
            image: Some(spec.spec.image_reference()),
            entrypoint: Some(spec.entrypoint()),
            cmd: Some(spec.command_with_args()),
            env: Some(spec.env()),
            working_dir: Some(work_dir.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            network_disabled: Some(!cfg.enable_networking),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}", host_dir.display(), work_dir)]),
                memory,
                memory_swap: memory,
                runtime,
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Provider for DockerProvider {
    async fn info(&self) -> Result<SandboxInfo, SandboxError> {
        let version = self.docker.version().await?;
        Ok(SandboxInfo {
            backend: BACKEND_TYPE.to_string(),
            version: version.version.unwrap_or_default(),
        })
    }

    async fn prepare(&self, spec: &Spec, force: bool) -> Result<(), SandboxError> {
        let image = spec.image_reference();
        if !force && self.image_exists(&image).await? {
            debug!(image = %image, "image already present");
            return Ok(());
        }

        let (repository, tag) = split_image(&image);
        info!(image = %image, "pulling image");

        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            progress?;
        }

        info!(image = %image, "image pulled");
        Ok(())
    }

    async fn create_sandbox(&self, spec: &RunSpec) -> Result<Arc<dyn Sandbox>, SandboxError> {
        self.prepare(&spec.spec, false).await?;

        let config = self.container_config(spec)?;
        let name = container_name(&spec.language);
        let options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let created = self.docker.create_container(Some(options), config).await?;
        debug!(id = %created.id, name = %name, "container created");

        Ok(Arc::new(DockerSandbox::new(self.docker.clone(), created.id)))
    }
}

fn absolute(path: &Path) -> Result<PathBuf, SandboxError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::fixtures::SpecFixtures;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn provider(config: Config) -> DockerProvider {
        // the client connects lazily, no daemon is needed here
        let docker = Docker::connect_with_unix(
            "/var/run/docker.sock",
            120,
            bollard::API_DEFAULT_VERSION,
        )
        .unwrap();
        DockerProvider::with_client(docker, Arc::new(config))
    }

    fn run_spec(host_root: &str) -> RunSpec {
        RunSpec::assemble(
            SpecFixtures::python(),
            "python3",
            vec!["--verbose".to_string()],
            HashMap::new(),
            "ns-0",
            host_root,
        )
    }

    #[test]
    fn test_container_config_defaults() {
        let config = provider(Config::default())
            .container_config(&run_spec("/srv/sandbox"))
            .unwrap();

        assert_eq!(config.image.as_deref(), Some("python:3-alpine"));
        assert_eq!(config.entrypoint, Some(vec!["python3".to_string()]));
        assert_eq!(
            config.cmd,
            Some(vec!["main.py".to_string(), "--verbose".to_string()])
        );
        assert_eq!(config.working_dir.as_deref(), Some("/var/tmp/exec/ns-0"));
        assert_eq!(config.network_disabled, Some(true));

        let host = config.host_config.unwrap();
        assert_eq!(
            host.binds,
            Some(vec!["/srv/sandbox/ns-0:/var/tmp/exec/ns-0".to_string()])
        );
        assert_eq!(host.memory, Some(100 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.runtime, None);

        let env = config.env.unwrap();
        assert!(env.contains(&"RUNNER_HOSTDIR=/srv/sandbox".to_string()));
    }

    #[test]
    fn test_container_config_opt_ins() {
        let mut config = Config::default();
        config.sandbox.enable_networking = true;
        config.sandbox.runtime = "runsc".to_string();
        config.sandbox.memory = "256m".to_string();

        let config = provider(config)
            .container_config(&run_spec("/srv/sandbox"))
            .unwrap();

        assert_eq!(config.network_disabled, Some(false));
        let host = config.host_config.unwrap();
        assert_eq!(host.runtime.as_deref(), Some("runsc"));
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, Some(256 * 1024 * 1024));
    }

    #[test]
    fn test_container_config_without_memory_limit() {
        let mut config = Config::default();
        config.sandbox.memory = String::new();

        let host = provider(config)
            .container_config(&run_spec("/srv/sandbox"))
            .unwrap()
            .host_config
            .unwrap();
        assert_eq!(host.memory, None);
        assert_eq!(host.memory_swap, None);
    }

    #[test]
    fn test_relative_host_dir_is_bound_absolute() {
        let config = provider(Config::default())
            .container_config(&run_spec("staging"))
            .unwrap();

        let expected = std::env::current_dir().unwrap().join("staging").join("ns-0");
        let binds = config.host_config.unwrap().binds.unwrap();
        assert_eq!(
            binds,
            vec![format!("{}:/var/tmp/exec/ns-0", expected.display())]
        );
    }

    #[test]
    fn test_invalid_memory_is_configuration_error() {
        let mut config = Config::default();
        config.sandbox.memory = "lots".to_string();

        let err = provider(config)
            .container_config(&run_spec("/srv/sandbox"))
            .unwrap_err();
        assert!(matches!(err, SandboxError::Configuration(_)));
    }
}
