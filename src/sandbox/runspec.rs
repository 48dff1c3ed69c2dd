//! Concrete run configuration of one execution.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::spec::Spec;

/// Environment variable always passed to the sandbox, carrying the host
/// staging root. Callers cannot override it.
pub const HOST_DIR_ENV: &str = "RUNNER_HOSTDIR";

/// Working directory root inside the sandbox. Each execution gets its own
/// subdirectory below it.
pub const SANDBOX_WORK_ROOT: &str = "/var/tmp/exec";

static ARG_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:[^\s"]+|"[^"]*")+"#).expect("argument pattern is valid"));

/// A [`Spec`] made concrete with the per-execution arguments, environment
/// and filesystem paths.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub spec: Spec,
    /// Requested language key, kept for naming and logging.
    pub language: String,
    pub arguments: Vec<String>,
    pub environment: HashMap<String, String>,
    /// Unique per-execution path segment.
    pub subdir: String,
    /// Host staging root. The staging directory is `host_dir/subdir`.
    pub host_dir: PathBuf,
}

impl RunSpec {
    pub fn assemble(
        spec: Spec,
        language: impl Into<String>,
        arguments: Vec<String>,
        environment: HashMap<String, String>,
        subdir: impl Into<String>,
        host_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut spec = spec;
        if spec.cmd.is_empty() {
            spec.cmd = spec.file_name.clone();
        }

        Self {
            spec,
            language: language.into(),
            arguments,
            environment,
            subdir: subdir.into(),
            host_dir: host_dir.into(),
        }
    }

    /// Host staging directory of this execution.
    pub fn assembled_host_dir(&self) -> PathBuf {
        self.host_dir.join(&self.subdir)
    }

    /// Working directory of this execution inside the sandbox.
    pub fn work_dir(&self) -> String {
        format!("{}/{}", SANDBOX_WORK_ROOT, self.subdir)
    }

    pub fn entrypoint(&self) -> Vec<String> {
        split_args(&self.spec.entrypoint)
    }

    /// Command tokens followed by the caller's arguments.
    pub fn command_with_args(&self) -> Vec<String> {
        let mut cmd = split_args(&self.spec.cmd);
        cmd.extend(self.arguments.iter().cloned());
        cmd
    }

    /// `KEY=VALUE` pairs sorted by key. [`HOST_DIR_ENV`] always carries the
    /// configured host root.
    pub fn env(&self) -> Vec<String> {
        let host_dir = path_str(&self.host_dir);
        let mut vars: BTreeMap<&str, &str> = self
            .environment
            .iter()
            .filter(|(k, _)| k.as_str() != HOST_DIR_ENV)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        vars.insert(HOST_DIR_ENV, &host_dir);

        vars.into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Splits a command line on whitespace, keeping double-quoted spans together
/// and stripping the quotes.
pub fn split_args(line: &str) -> Vec<String> {
    ARG_RX
        .find_iter(line)
        .map(|m| m.as_str().replace('"', ""))
        .collect()
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
