//! Execution orchestration.
//!
//! The [`Manager`] owns the shared running-set of sandboxes. Every execution
//! inserts its sandbox on creation and removes it only after teardown has
//! finished. Teardown of an entry is serialized by a per-entry lock, so a
//! sandbox is destroyed exactly once, either by the owning execution or by
//! [`Manager::cleanup`], and cleanup waits for a teardown already in progress.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfigProvider;
use crate::file::FileProvider;
use crate::models::{ExecutionRequest, ExecutionResponse};
use crate::namespace::NamespaceProvider;
use crate::sandbox::output::{stream_channel, OutputCollector};
use crate::sandbox::{inline, OutputSender, Provider, RunSpec, Sandbox, SandboxError};
use crate::size::parse_size;
use crate::spec::SpecRegistry;

/// A sandbox between creation and teardown.
#[derive(Debug, Clone)]
struct RunningSandbox {
    sandbox: Arc<dyn Sandbox>,
    staging_dir: PathBuf,
    /// Held for the whole teardown, `true` once it completed.
    torn_down: Arc<Mutex<bool>>,
}

type RunningSet = Arc<RwLock<HashMap<String, RunningSandbox>>>;

/// Orchestrates sandboxed executions and tracks every one in flight.
#[derive(Clone)]
pub struct Manager {
    provider: Arc<dyn Provider>,
    specs: Arc<SpecRegistry>,
    files: Arc<dyn FileProvider>,
    namespaces: Arc<dyn NamespaceProvider>,
    config: Arc<dyn ConfigProvider>,
    running: RunningSet,
}

impl Manager {
    pub fn new(
        provider: Arc<dyn Provider>,
        specs: Arc<SpecRegistry>,
        files: Arc<dyn FileProvider>,
        namespaces: Arc<dyn NamespaceProvider>,
        config: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self {
            provider,
            specs,
            files,
            namespaces,
            config,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        self.provider.clone()
    }

    pub fn specs(&self) -> Arc<SpecRegistry> {
        self.specs.clone()
    }

    /// IDs of all sandboxes currently between creation and teardown.
    pub async fn running_ids(&self) -> Vec<String> {
        self.running.read().await.keys().cloned().collect()
    }

    /// Prepares the image of every resolved spec that declares one.
    ///
    /// A failing image does not stop the others. All failures are returned.
    pub async fn prepare_environments(&self, force: bool) -> Vec<SandboxError> {
        let mut errors = Vec::new();

        for (language, spec) in self.specs.resolved() {
            if spec.image.is_empty() {
                continue;
            }
            info!(spec = %language, image = %spec.image, force, "preparing environment");
            if let Err(e) = self.provider.prepare(&spec, force).await {
                error!(spec = %language, image = %spec.image, error = %e, "failed preparing environment");
                errors.push(e);
            }
        }

        errors
    }

    /// Runs the request in a fresh sandbox and streams its output into
    /// `stdout` and `stderr`.
    ///
    /// If `spawn` is given, it receives the sandbox ID as soon as the sandbox
    /// exists. Returns the wall-clock execution time.
    ///
    /// The execution runs on its own task, so dropping the returned future
    /// does not skip teardown.
    pub async fn run_in_sandbox(
        &self,
        ctx: &CancellationToken,
        request: ExecutionRequest,
        spawn: Option<oneshot::Sender<String>>,
        stdout: OutputSender,
        stderr: OutputSender,
    ) -> Result<Duration, SandboxError> {
        let manager = self.clone();
        let ctx = ctx.clone();
        let language = request.language.clone();

        let result = tokio::spawn(async move {
            manager
                .run_owned(ctx, request, spawn, stdout, stderr)
                .await
        })
        .await
        .map_err(|e| SandboxError::Backend(format!("execution task failed: {}", e)))
        .and_then(|result| result);

        if let Err(e) = &result {
            if e.is_system() {
                error!(spec = %language, error = %e, "sandbox run failed");
            } else {
                debug!(spec = %language, error = %e, "sandbox run rejected");
            }
        }

        result
    }

    /// Runs the request and collects its output into capped buffers.
    pub async fn execute(
        &self,
        ctx: &CancellationToken,
        request: ExecutionRequest,
    ) -> Result<ExecutionResponse, SandboxError> {
        let cap = parse_size(&self.config.config().sandbox.stream_buffer_cap)
            .map_err(|e| SandboxError::Configuration(e.to_string()))?;
        let cap = usize::try_from(cap).unwrap_or(usize::MAX);

        let (out_tx, out_rx) = stream_channel();
        let (err_tx, err_rx) = stream_channel();
        let collector = OutputCollector::spawn(out_rx, err_rx, cap);

        let result = self.run_in_sandbox(ctx, request, None, out_tx, err_tx).await;
        let (stdout, stderr) = collector.stop().await?;
        let elapsed = result?;

        Ok(ExecutionResponse {
            stdout: stdout.to_string_lossy(),
            stderr: stderr.to_string_lossy(),
            exec_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Kills the sandbox with the given ID if it is registered and running.
    ///
    /// Returns `false` if there is no such sandbox or it already stopped.
    /// Teardown stays with the owning execution. Gives up with
    /// [`SandboxError::Cancelled`] when `ctx` fires first.
    pub async fn kill_and_clean_up(
        &self,
        ctx: &CancellationToken,
        id: &str,
    ) -> Result<bool, SandboxError> {
        let sandbox = self
            .running
            .read()
            .await
            .get(id)
            .map(|entry| entry.sandbox.clone());

        let sandbox = match sandbox {
            Some(sandbox) => sandbox,
            None => return Ok(false),
        };

        let kill = async {
            if !sandbox.is_running().await? {
                return Ok(false);
            }
            sandbox.kill().await?;
            Ok::<_, SandboxError>(true)
        };

        let killed = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(SandboxError::Cancelled),
            killed = kill => killed?,
        };
        if killed {
            info!(id = %id, "sandbox killed");
        }
        Ok(killed)
    }

    /// Kills and deletes every registered sandbox and removes its staging
    /// directory. Returns all teardown failures.
    ///
    /// A teardown already running for an entry is awaited instead of
    /// repeated. Entries not torn down before `ctx` fires stay registered and
    /// are reported as [`SandboxError::Cancelled`].
    pub async fn cleanup(&self, ctx: &CancellationToken) -> Vec<SandboxError> {
        let entries: Vec<(String, RunningSandbox)> = self
            .running
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        let mut errors = Vec::new();

        for (id, entry) in entries {
            info!(id = %id, "killing and cleaning up running sandbox");
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    warn!(id = %id, "cleanup cancelled");
                    errors.push(SandboxError::Cancelled);
                }
                failed = self.teardown_entry(&id, &entry) => errors.extend(failed),
            }
        }

        errors
    }

    async fn run_owned(
        &self,
        ctx: CancellationToken,
        request: ExecutionRequest,
        spawn: Option<oneshot::Sender<String>>,
        stdout: OutputSender,
        stderr: OutputSender,
    ) -> Result<Duration, SandboxError> {
        if request.code.is_empty() {
            return Err(SandboxError::EmptyCode);
        }

        let spec = self
            .specs
            .get(&request.language)
            .ok_or_else(|| SandboxError::UnsupportedLanguage(request.language.clone()))?;

        let code = if request.inline_expression {
            inline::expand(&spec, &request.code)?
        } else {
            request.code
        };

        let subdir = self
            .namespaces
            .get()
            .map_err(|e| SandboxError::Staging(e.to_string()))?;
        let run_spec = RunSpec::assemble(
            spec,
            request.language,
            request.arguments,
            request.environment,
            subdir,
            &self.config.config().host_root_dir,
        );

        let staging_dir = run_spec.assembled_host_dir();
        self.stage(&run_spec, &code).await?;

        let sandbox = match self.provider.create_sandbox(&run_spec).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                self.discard_staging(&staging_dir).await;
                return Err(e);
            }
        };
        let id = sandbox.id().to_string();

        self.running.write().await.insert(
            id.clone(),
            RunningSandbox {
                sandbox: sandbox.clone(),
                staging_dir,
                torn_down: Arc::new(Mutex::new(false)),
            },
        );
        info!(id = %id, spec = %run_spec.language, "created sandbox");

        if let Some(spawn) = spawn {
            // the receiver may be gone, the execution continues regardless
            let _ = spawn.send(id.clone());
        }

        let result = self.run_with_deadline(&ctx, sandbox.as_ref(), stdout, stderr).await;
        if let Err(SandboxError::TimedOut(_)) = &result {
            debug!(id = %id, spec = %run_spec.language, "execution timed out");
        }

        let errors = self.teardown(&id).await;
        info!(id = %id, spec = %run_spec.language, "sandbox cleaned up");

        if errors.is_empty() {
            return result;
        }
        Err(SandboxError::Cleanup {
            run: result.err().map(Box::new),
            errors,
        })
    }

    async fn stage(&self, run_spec: &RunSpec, code: &str) -> Result<(), SandboxError> {
        let dir = run_spec.assembled_host_dir();

        self.files
            .create_directory(&dir)
            .await
            .map_err(|e| SandboxError::Staging(format!("creating {}: {}", dir.display(), e)))?;

        let file = dir.join(&run_spec.spec.file_name);
        if let Err(e) = self.files.create_file_with_content(&file, code).await {
            self.discard_staging(&dir).await;
            return Err(SandboxError::Staging(format!("writing {}: {}", file.display(), e)));
        }

        Ok(())
    }

    async fn discard_staging(&self, dir: &std::path::Path) {
        if let Err(e) = self.files.delete_directory(dir).await {
            error!(dir = %dir.display(), error = %e, "failed removing staging directory");
        }
    }

    async fn run_with_deadline(
        &self,
        ctx: &CancellationToken,
        sandbox: &dyn Sandbox,
        stdout: OutputSender,
        stderr: OutputSender,
    ) -> Result<Duration, SandboxError> {
        let timeout = self.config.config().sandbox.timeout();
        let run_token = ctx.child_token();
        let started = Instant::now();

        let outcome =
            tokio::time::timeout(timeout, sandbox.run(run_token.clone(), stdout, stderr)).await;
        run_token.cancel();

        match outcome {
            Err(_) => Err(SandboxError::TimedOut(timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) if ctx.is_cancelled() => Err(SandboxError::Cancelled),
            Ok(Ok(())) => Ok(started.elapsed()),
        }
    }

    /// Tears down the registered sandbox `id`. Does nothing if
    /// [`Manager::cleanup`] tore it down already.
    async fn teardown(&self, id: &str) -> Vec<SandboxError> {
        let entry = self.running.read().await.get(id).cloned();
        match entry {
            Some(entry) => self.teardown_entry(id, &entry).await,
            None => Vec::new(),
        }
    }

    /// Destroys the entry unless another party already did, then removes it
    /// from the running-set. The entry stays registered until destruction
    /// has finished.
    async fn teardown_entry(&self, id: &str, entry: &RunningSandbox) -> Vec<SandboxError> {
        let mut torn_down = entry.torn_down.lock().await;
        if *torn_down {
            return Vec::new();
        }

        let errors = self.destroy(entry).await;
        *torn_down = true;
        self.running.write().await.remove(id);
        errors
    }

    async fn destroy(&self, entry: &RunningSandbox) -> Vec<SandboxError> {
        let mut errors = Vec::new();

        match entry.sandbox.is_running().await {
            Ok(true) => {
                if let Err(e) = entry.sandbox.kill().await {
                    errors.push(e);
                }
            }
            Ok(false) => {}
            Err(e) => errors.push(e),
        }

        if let Err(e) = entry.sandbox.delete().await {
            errors.push(e);
        }

        if let Err(e) = self.files.delete_directory(&entry.staging_dir).await {
            errors.push(SandboxError::Staging(format!(
                "removing {}: {}",
                entry.staging_dir.display(),
                e
            )));
        }

        errors
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("specs", &self.specs.len())
            .finish_non_exhaustive()
    }
}
