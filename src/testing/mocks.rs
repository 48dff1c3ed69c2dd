//! Mock objects and test doubles for the execution core.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::file::FileProvider;
use crate::models::SandboxInfo;
use crate::namespace::{NamespaceError, NamespaceProvider};
use crate::sandbox::{OutputSender, Provider, RunSpec, Sandbox, SandboxError};
use crate::spec::Spec;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted behaviour of every sandbox a [`MockProvider`] creates.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub stdout: Vec<Vec<u8>>,
    pub stderr: Vec<Vec<u8>>,
    /// How long the sandbox keeps running after emitting its output.
    pub run_for: Duration,
    pub fail_run: bool,
    pub fail_kill: bool,
    pub fail_delete: bool,
    /// How long every delete call takes.
    pub delete_delay: Duration,
}

impl MockBehavior {
    pub fn with_stdout(mut self, chunk: &str) -> Self {
        self.stdout.push(chunk.as_bytes().to_vec());
        self
    }

    pub fn with_stderr(mut self, chunk: &str) -> Self {
        self.stderr.push(chunk.as_bytes().to_vec());
        self
    }

    pub fn running_for(mut self, duration: Duration) -> Self {
        self.run_for = duration;
        self
    }

    pub fn deleting_for(mut self, duration: Duration) -> Self {
        self.delete_delay = duration;
        self
    }
}

/// Sandbox that emits scripted output and records every lifecycle call.
#[derive(Debug)]
pub struct MockSandbox {
    id: String,
    behavior: MockBehavior,
    running: AtomicBool,
    killed: Notify,
    pub runs: AtomicUsize,
    pub kills: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MockSandbox {
    pub fn new(id: impl Into<String>, behavior: MockBehavior) -> Self {
        Self {
            id: id.into(),
            behavior,
            running: AtomicBool::new(false),
            killed: Notify::new(),
            runs: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Marks the sandbox as running without going through `run`.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        cancel: CancellationToken,
        stdout: OutputSender,
        stderr: OutputSender,
    ) -> Result<(), SandboxError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_run {
            return Err(SandboxError::Backend("mock run failed".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);

        for chunk in &self.behavior.stdout {
            let _ = stdout.send(chunk.clone()).await;
        }
        for chunk in &self.behavior.stderr {
            let _ = stderr.send(chunk.clone()).await;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.behavior.run_for) => {
                self.running.store(false, Ordering::SeqCst);
            }
            _ = self.killed.notified() => {}
            // like a detached container, the unit keeps running
            _ = cancel.cancelled() => {}
        }

        Ok(())
    }

    async fn is_running(&self) -> Result<bool, SandboxError> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn kill(&self) -> Result<(), SandboxError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_kill {
            return Err(SandboxError::Backend("mock kill failed".to_string()));
        }
        self.running.store(false, Ordering::SeqCst);
        self.killed.notify_one();
        Ok(())
    }

    async fn delete(&self) -> Result<(), SandboxError> {
        // counted once the delay has passed
        if !self.behavior.delete_delay.is_zero() {
            tokio::time::sleep(self.behavior.delete_delay).await;
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_delete {
            return Err(SandboxError::Backend("mock delete failed".to_string()));
        }
        Ok(())
    }
}

/// Provider handing out [`MockSandbox`]es and recording prepare and
/// create calls.
#[derive(Debug, Default)]
pub struct MockProvider {
    behavior: MockBehavior,
    failing_images: HashSet<String>,
    fail_create: bool,
    counter: AtomicUsize,
    prepared: Mutex<Vec<(String, bool)>>,
    created: Mutex<Vec<RunSpec>>,
    sandboxes: Mutex<Vec<Arc<MockSandbox>>>,
}

impl MockProvider {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    pub fn failing_prepare_for(mut self, image: &str) -> Self {
        self.failing_images.insert(image.to_string());
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Images prepared so far with their `force` flag.
    pub fn prepared(&self) -> Vec<(String, bool)> {
        lock(&self.prepared).clone()
    }

    /// Run specs of every created sandbox, in creation order.
    pub fn created(&self) -> Vec<RunSpec> {
        lock(&self.created).clone()
    }

    pub fn sandboxes(&self) -> Vec<Arc<MockSandbox>> {
        lock(&self.sandboxes).clone()
    }

    pub fn sandbox(&self, id: &str) -> Option<Arc<MockSandbox>> {
        lock(&self.sandboxes).iter().find(|s| s.id() == id).cloned()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn info(&self) -> Result<SandboxInfo, SandboxError> {
        Ok(SandboxInfo {
            backend: "mock".to_string(),
            version: "0.0.0".to_string(),
        })
    }

    async fn prepare(&self, spec: &Spec, force: bool) -> Result<(), SandboxError> {
        lock(&self.prepared).push((spec.image.clone(), force));
        if self.failing_images.contains(&spec.image) {
            return Err(SandboxError::Backend(format!("pull of {} failed", spec.image)));
        }
        Ok(())
    }

    async fn create_sandbox(&self, spec: &RunSpec) -> Result<Arc<dyn Sandbox>, SandboxError> {
        if self.fail_create {
            return Err(SandboxError::Backend("mock create failed".to_string()));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let sandbox = Arc::new(MockSandbox::new(format!("mock-{}", n), self.behavior.clone()));
        lock(&self.created).push(spec.clone());
        lock(&self.sandboxes).push(sandbox.clone());
        Ok(sandbox)
    }
}

/// In-memory [`FileProvider`] keeping a history of every written file.
#[derive(Debug, Default)]
pub struct MemoryFileProvider {
    dirs: Mutex<BTreeSet<PathBuf>>,
    files: Mutex<BTreeMap<PathBuf, String>>,
    written: Mutex<Vec<(PathBuf, String)>>,
    fail_writes: bool,
}

impl MemoryFileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    /// Directories currently present.
    pub fn directories(&self) -> Vec<PathBuf> {
        lock(&self.dirs).iter().cloned().collect()
    }

    /// Every file ever written with its content, including deleted ones.
    pub fn written(&self) -> Vec<(PathBuf, String)> {
        lock(&self.written).clone()
    }
}

#[async_trait]
impl FileProvider for MemoryFileProvider {
    async fn create_directory(&self, path: &Path) -> std::io::Result<()> {
        lock(&self.dirs).insert(path.to_path_buf());
        Ok(())
    }

    async fn create_file_with_content(&self, path: &Path, content: &str) -> std::io::Result<()> {
        if self.fail_writes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only filesystem",
            ));
        }
        lock(&self.files).insert(path.to_path_buf(), content.to_string());
        lock(&self.written).push((path.to_path_buf(), content.to_string()));
        Ok(())
    }

    async fn delete_directory(&self, path: &Path) -> std::io::Result<()> {
        lock(&self.dirs).retain(|dir| !dir.starts_with(path));
        lock(&self.files).retain(|file, _| !file.starts_with(path));
        Ok(())
    }
}

/// Namespace provider returning `ns-0`, `ns-1`, ...
#[derive(Debug, Default)]
pub struct SequenceNamespaceProvider {
    next: AtomicUsize,
}

impl SequenceNamespaceProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NamespaceProvider for SequenceNamespaceProvider {
    fn get(&self) -> Result<String, NamespaceError> {
        Ok(format!("ns-{}", self.next.fetch_add(1, Ordering::SeqCst)))
    }
}
