//! Container runtime boundary.
//!
//! The launcher only needs four operations from Docker/Podman, so they sit
//! behind a trait and the CLI-backed implementation shells out through `Cmd`.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::cmd::Cmd;
use crate::config::SandboxRuntime;
use crate::error::LaunchError;

/// Operations the launcher performs against a container engine.
pub trait ContainerRuntime {
    /// Name of the runtime, used in messages and the dry-run command line.
    fn name(&self) -> &str;

    /// Start a detached container with the given `run` arguments and return its id.
    fn run_detached(&self, args: &[String]) -> Result<String>;

    /// Ids of running containers created from `image`.
    fn running_containers(&self, image: &str) -> Result<Vec<String>>;

    /// Combined stdout/stderr logs of a container.
    fn logs(&self, id: &str) -> Result<String>;

    /// First network address assigned to a container, if any.
    fn address(&self, id: &str) -> Result<Option<String>>;
}

/// `docker`/`podman` driven through their CLIs.
pub struct CliRuntime {
    runtime: SandboxRuntime,
    program: PathBuf,
}

impl CliRuntime {
    /// Resolve the runtime binary on PATH.
    pub fn new(runtime: SandboxRuntime) -> Result<Self> {
        let binary = runtime.binary();
        let program =
            which::which(binary).map_err(|_| LaunchError::RuntimeNotFound(binary.to_string()))?;
        debug!(runtime = binary, path = %program.display(), "runtime:resolved");
        Ok(Self::at(runtime, program))
    }

    /// Drive `runtime` through the executable at `program`.
    pub fn at(runtime: SandboxRuntime, program: PathBuf) -> Self {
        Self { runtime, program }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(self.program.to_string_lossy())
    }
}

const ADDRESS_TEMPLATE: &str = "{{range .NetworkSettings.Networks}}{{.IPAddress}} {{end}}";

impl ContainerRuntime for CliRuntime {
    fn name(&self) -> &str {
        self.runtime.binary()
    }

    fn run_detached(&self, args: &[String]) -> Result<String> {
        info!(runtime = self.name(), "runtime:run");
        let stdout = self
            .cmd()
            .args(args.iter().cloned())
            .run_and_capture_stdout()
            .with_context(|| format!("Failed to start container with {}", self.name()))?;
        match parse_container_id(&stdout) {
            Some(id) => {
                info!(container = %id, "runtime:started");
                Ok(id)
            }
            None => bail!("{} run did not report a container id", self.name()),
        }
    }

    fn running_containers(&self, image: &str) -> Result<Vec<String>> {
        let stdout = self
            .cmd()
            .args(["ps", "-q", "--no-trunc", "--filter", "status=running", "--filter"])
            .arg(format!("ancestor={}", image))
            .run_and_capture_stdout()
            .context("Failed to list running containers")?;
        let ids = parse_container_ids(&stdout);
        debug!(image, count = ids.len(), "runtime:ps");
        Ok(ids)
    }

    fn logs(&self, id: &str) -> Result<String> {
        self.cmd()
            .args(["logs", id])
            .run_and_capture_all()
            .with_context(|| format!("Failed to read logs of container {}", id))
    }

    fn address(&self, id: &str) -> Result<Option<String>> {
        let stdout = self
            .cmd()
            .args(["inspect", "-f", ADDRESS_TEMPLATE, id])
            .run_and_capture_stdout()
            .with_context(|| format!("Failed to inspect container {}", id))?;
        Ok(parse_address(&stdout))
    }
}

/// The container id is the last non-empty line `run -d` prints on stdout.
pub fn parse_container_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .map(str::to_string)
}

pub fn parse_container_ids(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_address(stdout: &str) -> Option<String> {
    stdout.split_whitespace().next().map(str::to_string)
}

/// Whether a running id refers to the container we started. `ps` may print
/// truncated or full ids depending on the engine, so compare by prefix.
pub fn same_container(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.starts_with(b) || b.starts_with(a))
}
