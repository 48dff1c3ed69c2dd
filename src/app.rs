//! Application bootstrap and lifecycle.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{self, AppState};
use crate::config::{Config, ConfigValidator};
use crate::error::{RunnerError, RunnerResult};
use crate::file::LocalFileProvider;
use crate::namespace::RandomNamespaceProvider;
use crate::sandbox::docker::DockerProvider;
use crate::sandbox::{Manager, Provider};
use crate::scheduler::{schedule_maintenance, Scheduler};
use crate::spec::{self, SpecProvider};

/// Wired-up runner: configuration, specs and the execution manager.
pub struct App {
    config: Arc<Config>,
    specs: Arc<dyn SpecProvider>,
    manager: Manager,
}

impl App {
    /// Validates the configuration, loads the specs and connects to Docker.
    pub async fn bootstrap(config: Config) -> RunnerResult<Self> {
        ConfigValidator::new().validate(&config)?;

        let config = Arc::new(config);
        let specs = spec::provider::from_location(&config.spec_file);
        specs.load().await?;
        info!(specs = specs.registry().len(), source = %config.spec_file, "specs loaded");

        let provider = DockerProvider::new(config.clone())?;
        Ok(Self::with_provider(config, specs, Arc::new(provider)))
    }

    /// Builds the app around an already loaded spec provider and an
    /// arbitrary sandbox backend.
    pub fn with_provider(
        config: Arc<Config>,
        specs: Arc<dyn SpecProvider>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        if config.sandbox.enable_networking {
            warn!("sandbox networking is enabled, executed code can reach the network");
        }

        let manager = Manager::new(
            provider,
            specs.registry(),
            Arc::new(LocalFileProvider::new()),
            Arc::new(RandomNamespaceProvider::new()),
            config.clone(),
        );

        Self {
            config,
            specs,
            manager,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Prepares the image of every spec.
    pub async fn prepare(&self, force: bool) -> RunnerResult<()> {
        let total = self.specs.registry().resolved().len();
        let errors = self.manager.prepare_environments(force).await;
        if errors.is_empty() {
            info!("all environments prepared");
            return Ok(());
        }
        Err(RunnerError::Aggregate {
            failed: errors.len(),
            total,
        })
    }

    /// Serves the API until `shutdown` fires, then tears down every sandbox
    /// still running.
    pub async fn serve(self, shutdown: CancellationToken) -> RunnerResult<()> {
        if self.config.skip_startup_prep {
            info!("skipping startup environment preparation");
        } else if let Err(e) = self.prepare(false).await {
            warn!(error = %e, "environment preparation incomplete");
        }

        let mut scheduler = Scheduler::new();
        schedule_maintenance(
            &mut scheduler,
            &self.config.scheduler,
            self.manager.clone(),
            self.specs.clone(),
        );

        let state = AppState::new(self.manager.clone(), &self.config, shutdown.clone())?;
        let router = api::router(state, self.config.api.cors_enabled);

        let listener = tokio::net::TcpListener::bind(self.config.api.bind_address.as_str()).await?;
        info!(address = %self.config.api.bind_address, "api listening");

        let token = shutdown.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;

        info!("shutting down");
        scheduler.stop().await;

        // shutdown already fired, cleanup gets its own token
        let errors = self.manager.cleanup(&CancellationToken::new()).await;
        for e in &errors {
            error!(error = %e, "cleanup failed");
        }

        served.map_err(|e| RunnerError::Server(e.to_string()))
    }
}

/// Resolves once Ctrl-C or SIGTERM is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed listening for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed listening for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("received shutdown signal");
}
