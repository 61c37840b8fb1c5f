use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::LaunchError;

const APP_DIR: &str = "sandbox-launcher";

/// Container runtime used to start the sandbox
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SandboxRuntime {
    /// Docker (default)
    #[default]
    Docker,
    /// Podman
    Podman,
}

impl SandboxRuntime {
    /// Name of the runtime's CLI binary.
    pub fn binary(&self) -> &'static str {
        match self {
            SandboxRuntime::Docker => "docker",
            SandboxRuntime::Podman => "podman",
        }
    }
}

/// Transport protocol of a published port
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A host port published to a port inside the sandbox.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
    /// Human label shown in the connection summary
    #[serde(default)]
    pub label: Option<String>,
}

impl PortMapping {
    fn same(port: u16, label: &str) -> Self {
        Self {
            host: port,
            container: port,
            protocol: Protocol::Tcp,
            label: Some(label.to_string()),
        }
    }

    /// Value for the runtime's `-p` flag, e.g. `8080:8080/tcp`.
    pub fn publish_arg(&self) -> String {
        format!("{}:{}/{}", self.host, self.container, self.protocol.as_str())
    }
}

/// Container port serving the browser VNC client.
pub const VNC_WEB_PORT: u16 = 8080;

/// Port table published by default.
pub fn default_ports() -> Vec<PortMapping> {
    vec![
        PortMapping::same(VNC_WEB_PORT, "VNC (web)"),
        PortMapping::same(8081, "Dashboard"),
        PortMapping::same(5900, "VNC"),
        PortMapping::same(8894, "Notebook"),
        PortMapping::same(8265, "Ray dashboard"),
        PortMapping::same(6006, "TensorBoard"),
    ]
}

/// Launcher configuration. Every field is optional; accessors supply defaults.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Container runtime. Default: docker
    #[serde(default)]
    pub runtime: Option<SandboxRuntime>,

    /// Request GPU devices. Default: true
    #[serde(default)]
    pub gpus: Option<bool>,

    /// Value for `--gpus`. Default: "all"
    #[serde(default)]
    pub gpu_devices: Option<String>,

    /// IPC namespace mode. Default: "host" (needed for X/VNC shared memory)
    #[serde(default)]
    pub ipc: Option<String>,

    /// Shared memory size, e.g. "8g". Unset by default; `ipc: host` makes it moot.
    #[serde(default)]
    pub shm_size: Option<String>,

    /// Published ports. Default: 8080, 8081, 5900, 8894, 8265, 6006
    #[serde(default)]
    pub ports: Option<Vec<PortMapping>>,

    /// Host directory holding per-image storage. Default: ~/sandbox-storage
    #[serde(default)]
    pub storage_root: Option<PathBuf>,

    /// Directory searched for `*.pub` keys. Default: ~/.ssh
    #[serde(default)]
    pub ssh_dir: Option<PathBuf>,

    /// Known-hosts file to evict stale entries from. Default: <ssh_dir>/known_hosts
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    /// User for the printed SSH command. Default: root
    #[serde(default)]
    pub ssh_user: Option<String>,

    /// Delay before the readiness check, in milliseconds. Default: 1000
    #[serde(default)]
    pub readiness_delay_ms: Option<u64>,

    /// Mount point of the source folder. Default: /src
    #[serde(default)]
    pub src_target: Option<String>,

    /// Mount point of the storage folder. Default: /storage
    #[serde(default)]
    pub storage_target: Option<String>,

    /// Extra `KEY=VALUE` environment entries passed to the container
    #[serde(default)]
    pub env: Option<Vec<String>>,
}

impl Config {
    pub fn runtime(&self) -> SandboxRuntime {
        self.runtime.unwrap_or_default()
    }

    pub fn gpus_enabled(&self) -> bool {
        self.gpus.unwrap_or(true)
    }

    pub fn gpu_devices(&self) -> &str {
        self.gpu_devices.as_deref().unwrap_or("all")
    }

    pub fn ipc(&self) -> &str {
        self.ipc.as_deref().unwrap_or("host")
    }

    pub fn ports(&self) -> Vec<PortMapping> {
        self.ports.clone().unwrap_or_else(default_ports)
    }

    /// Host port reaching the browser VNC client.
    pub fn vnc_web_port(&self) -> u16 {
        self.ports()
            .iter()
            .find(|p| p.container == VNC_WEB_PORT)
            .map_or(VNC_WEB_PORT, |p| p.host)
    }

    pub fn storage_root(&self) -> anyhow::Result<PathBuf> {
        match &self.storage_root {
            Some(path) => expand_home(path),
            None => Ok(home_dir()?.join("sandbox-storage")),
        }
    }

    pub fn ssh_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.ssh_dir {
            Some(path) => expand_home(path),
            None => Ok(home_dir()?.join(".ssh")),
        }
    }

    pub fn known_hosts(&self) -> anyhow::Result<PathBuf> {
        match &self.known_hosts {
            Some(path) => expand_home(path),
            None => Ok(self.ssh_dir()?.join("known_hosts")),
        }
    }

    pub fn ssh_user(&self) -> &str {
        self.ssh_user.as_deref().unwrap_or("root")
    }

    pub fn readiness_delay_ms(&self) -> u64 {
        self.readiness_delay_ms.unwrap_or(1000)
    }

    pub fn src_target(&self) -> &str {
        self.src_target.as_deref().unwrap_or("/src")
    }

    pub fn storage_target(&self) -> &str {
        self.storage_target.as_deref().unwrap_or("/storage")
    }

    pub fn env(&self) -> Vec<&str> {
        self.env
            .as_ref()
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Load the configuration from an explicit path, or from the XDG config directory.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        debug!(explicit = ?explicit, "config:loading");
        let config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(LaunchError::InvalidConfig(format!(
                        "config file {} does not exist",
                        path.display()
                    ))
                    .into());
                }
                Self::load_from_path(path)?.unwrap_or_default()
            }
            None => Self::load_global()?.unwrap_or_default(),
        };
        config.validate()?;
        debug!(
            runtime = config.runtime().binary(),
            ports = config.ports().len(),
            "config:loaded"
        );
        Ok(config)
    }

    fn load_from_path(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "config:reading file");
        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Some(Self::default()));
        }
        let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
            LaunchError::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Some(config))
    }

    fn load_global() -> anyhow::Result<Option<Self>> {
        let Some(dir) = config_dir() else {
            return Ok(None);
        };
        for name in ["config.yaml", "config.yml"] {
            let path = dir.join(name);
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }
        Ok(None)
    }

    /// Reject configurations the runtime would fail on later with a less useful message.
    pub fn validate(&self) -> Result<(), LaunchError> {
        let mut seen = HashSet::new();
        for port in self.ports() {
            if port.host == 0 || port.container == 0 {
                return Err(LaunchError::InvalidConfig(format!(
                    "port mapping {} uses port 0",
                    port.publish_arg()
                )));
            }
            if !seen.insert((port.host, port.protocol)) {
                return Err(LaunchError::InvalidConfig(format!(
                    "host port {}/{} is published twice",
                    port.host,
                    port.protocol.as_str()
                )));
            }
        }

        if let Some(entry) = self.env().into_iter().find(|e| !is_env_assignment(e)) {
            return Err(LaunchError::InvalidConfig(format!(
                "env entry '{}' must be KEY=VALUE",
                entry
            )));
        }

        if self.ipc().trim().is_empty() {
            return Err(LaunchError::InvalidConfig("ipc must not be empty".into()));
        }

        Ok(())
    }
}

fn is_env_assignment(entry: &str) -> bool {
    entry
        .split_once('=')
        .is_some_and(|(key, _)| !key.is_empty() && !key.contains(char::is_whitespace))
}

/// Directory holding `config.yaml`: `$XDG_CONFIG_HOME/sandbox-launcher`, else
/// `~/.config/sandbox-launcher`.
fn config_dir() -> Option<PathBuf> {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME")
        && !config_home.is_empty()
    {
        return Some(PathBuf::from(config_home).join(APP_DIR));
    }
    home::home_dir().map(|home| home.join(".config").join(APP_DIR))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    home::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &Path) -> anyhow::Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(home_dir()?.join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}
