//! One-shot sandbox launch: validate, start, check readiness, report.
//!
//! Every failure is fatal. Preparation has no side effects so `--dry-run`
//! can share it with a real launch.

use anyhow::{Context, Result};
use console::style;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tabled::{
    Table, Tabled,
    settings::{Padding, Style, object::Columns},
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::LaunchError;
use crate::sandbox::plan::{RunPlan, build_run_args, storage_dir};
use crate::sandbox::runtime::{ContainerRuntime, same_container};
use crate::sandbox::ssh::{self, Eviction};
use crate::spinner;

/// The two positional arguments of a launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub image: String,
    pub src_folder: PathBuf,
}

/// A validated launch, ready to hand to a runtime.
#[derive(Debug, Clone)]
pub struct PreparedLaunch {
    pub image: String,
    pub src_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub public_key: Option<PathBuf>,
    pub run_args: Vec<String>,
}

/// Outcome of a successful launch.
#[derive(Debug, Clone)]
pub struct LaunchReport {
    pub container_id: String,
    pub address: Option<String>,
    pub public_key: Option<PathBuf>,
    pub storage_dir: PathBuf,
}

/// Validate the request and build the runtime arguments.
///
/// Fails if the source folder does not exist. A missing public key only
/// produces a warning on `stderr`.
pub fn prepare(
    request: &LaunchRequest,
    config: &Config,
    stderr: &mut dyn Write,
) -> Result<PreparedLaunch> {
    if !request.src_folder.is_dir() {
        return Err(LaunchError::SourceFolderMissing(request.src_folder.clone()).into());
    }
    // Bind mounts need an absolute path
    let src_dir = fs::canonicalize(&request.src_folder)
        .with_context(|| format!("Failed to resolve {}", request.src_folder.display()))?;

    let ssh_dir = config.ssh_dir()?;
    let (public_key, key_contents) = match ssh::find_public_key(&ssh_dir)? {
        Some(path) => match ssh::read_public_key(&path) {
            Ok(contents) => (Some(path), Some(contents)),
            Err(err) => {
                warn!(error = ?err, "launch:unreadable public key");
                writeln!(
                    stderr,
                    "{} could not read {}: {:#}. SSH access will not work.",
                    style("warning:").yellow().bold(),
                    path.display(),
                    err
                )?;
                (None, None)
            }
        },
        None => {
            warn!(dir = %ssh_dir.display(), "launch:no public key");
            writeln!(
                stderr,
                "{} no *.pub key found in {}. SSH access will not work.",
                style("warning:").yellow().bold(),
                ssh_dir.display()
            )?;
            (None, None)
        }
    };

    let storage_dir = storage_dir(&config.storage_root()?, &request.image);

    let plan = RunPlan {
        image: &request.image,
        src_dir: &src_dir,
        storage_dir: storage_dir.clone(),
        public_key: key_contents,
        config,
    };
    let run_args = build_run_args(&plan);

    debug!(
        image = %request.image,
        src = %src_dir.display(),
        storage = %storage_dir.display(),
        key = ?public_key,
        "launch:prepared"
    );

    Ok(PreparedLaunch {
        image: request.image.clone(),
        src_dir,
        storage_dir,
        public_key,
        run_args,
    })
}

/// Start the container, check once that it is running, evict the stale host
/// key for its address and print connection instructions to `out`.
pub fn start(
    prepared: &PreparedLaunch,
    config: &Config,
    runtime: &dyn ContainerRuntime,
    out: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<LaunchReport> {
    fs::create_dir_all(&prepared.storage_dir).with_context(|| {
        format!(
            "Failed to create storage directory {}",
            prepared.storage_dir.display()
        )
    })?;

    let started = runtime.run_detached(&prepared.run_args)?;
    info!(
        image = %prepared.image,
        src = %prepared.src_dir.display(),
        container = %started,
        "launch:container started"
    );

    let delay = Duration::from_millis(config.readiness_delay_ms());
    let container_id = spinner::with_spinner("Waiting for sandbox to start", || {
        thread::sleep(delay);
        find_running(runtime, &prepared.image, &started)
    })?;

    if !same_container(&container_id, &started) {
        warn!(
            started = %started,
            using = %container_id,
            "launch:started container not running, using another"
        );
        writeln!(
            stderr,
            "{} container {} is not running; using running container {} from image '{}'.",
            style("warning:").yellow().bold(),
            short_id(&started),
            short_id(&container_id),
            prepared.image
        )?;
    }

    let address = runtime.address(&container_id)?;
    match &address {
        Some(addr) => evict_stale_host_key(config, addr, stderr)?,
        None => {
            warn!(container = %container_id, "launch:no container address");
            writeln!(
                stderr,
                "{} container has no network address; SSH instructions unavailable.",
                style("warning:").yellow().bold()
            )?;
        }
    }

    let report = LaunchReport {
        container_id,
        address,
        public_key: prepared.public_key.clone(),
        storage_dir: prepared.storage_dir.clone(),
    };
    print_instructions(&report, config, out)?;
    Ok(report)
}

/// The single readiness check: the id of a running container from `image`,
/// preferring the one we started. Fails with its logs when none is running.
fn find_running(runtime: &dyn ContainerRuntime, image: &str, started: &str) -> Result<String> {
    let running = runtime.running_containers(image)?;
    if let Some(id) = running
        .iter()
        .find(|id| same_container(id, started))
        .or_else(|| running.first())
    {
        return Ok(id.clone());
    }

    let logs = runtime
        .logs(started)
        .unwrap_or_else(|e| format!("<logs unavailable: {:#}>", e));
    warn!(image, container = %started, "launch:container not running");
    Err(LaunchError::ContainerNotRunning {
        image: image.to_string(),
        logs: logs.trim_end().to_string(),
    }
    .into())
}

fn evict_stale_host_key(config: &Config, address: &str, stderr: &mut dyn Write) -> Result<()> {
    let known_hosts = config.known_hosts()?;
    match ssh::evict_host_key(&known_hosts, address) {
        Ok(Eviction::NoKnownHosts) => debug!(path = %known_hosts.display(), "launch:no known hosts"),
        Ok(outcome) => debug!(?outcome, address, "launch:host key evicted"),
        Err(err) => {
            warn!(error = ?err, address, "launch:host key eviction failed");
            writeln!(
                stderr,
                "{} could not clear old host key for {}: {:#}",
                style("warning:").yellow().bold(),
                address,
                err
            )?;
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct PortRow {
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "HOST")]
    host: String,
    #[tabled(rename = "CONTAINER")]
    container: String,
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn print_instructions(report: &LaunchReport, config: &Config, out: &mut dyn Write) -> Result<()> {
    writeln!(
        out,
        "{} {}",
        style("Sandbox running:").green().bold(),
        short_id(&report.container_id)
    )?;
    if let Some(addr) = &report.address {
        writeln!(out, "  SSH:     ssh {}@{}", config.ssh_user(), addr)?;
    }
    writeln!(out, "  VNC:     http://localhost:{}", config.vnc_web_port())?;
    writeln!(out, "  Storage: {}", report.storage_dir.display())?;
    if let Some(key) = &report.public_key {
        writeln!(out, "  Key:     {}", key.display())?;
    }
    writeln!(out)?;

    let rows: Vec<PortRow> = config
        .ports()
        .into_iter()
        .map(|p| PortRow {
            service: p.label.clone().unwrap_or_else(|| "-".to_string()),
            host: p.host.to_string(),
            container: format!("{}/{}", p.container, p.protocol.as_str()),
        })
        .collect();
    let mut table = Table::new(rows);
    table
        .with(Style::blank())
        .modify(Columns::new(0..3), Padding::new(0, 2, 0, 0));
    writeln!(out, "{table}")?;
    Ok(())
}

/// Print the exact runtime command a launch would execute.
pub fn print_dry_run(prepared: &PreparedLaunch, config: &Config, out: &mut dyn Write) -> Result<()> {
    writeln!(
        out,
        "{}",
        crate::shell::command_line(config.runtime().binary(), &prepared.run_args)
    )?;
    Ok(())
}
