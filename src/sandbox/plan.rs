//! Construction of the `run` arguments for a sandbox container.

use std::path::{Path, PathBuf};

use crate::config::Config;

/// Environment variable through which the container entrypoint receives the
/// authorized public key.
pub const PUBLIC_KEY_ENV: &str = "SSH_PUBLIC_KEY";

/// Everything needed to start one sandbox container.
#[derive(Debug, Clone)]
pub struct RunPlan<'a> {
    pub image: &'a str,
    pub src_dir: &'a Path,
    pub storage_dir: PathBuf,
    pub public_key: Option<String>,
    pub config: &'a Config,
}

/// Directory name for an image's persistent storage, e.g. `nvidia/ml:1.2` -> `nvidia-ml-1-2`.
pub fn storage_dir_name(image: &str) -> String {
    let name = slug::slugify(image);
    if name.is_empty() {
        "default".to_string()
    } else {
        name
    }
}

/// Host-side storage directory for an image under `root`.
pub fn storage_dir(root: &Path, image: &str) -> PathBuf {
    root.join(storage_dir_name(image))
}

fn bind_mount(source: &Path, target: &str) -> String {
    format!("type=bind,source={},target={}", source.display(), target)
}

/// Build the runtime arguments (without the runtime binary itself) for a
/// detached sandbox container.
pub fn build_run_args(plan: &RunPlan<'_>) -> Vec<String> {
    let config = plan.config;
    let mut args = vec!["run".to_string(), "-d".to_string()];

    if config.gpus_enabled() {
        args.push("--gpus".to_string());
        args.push(config.gpu_devices().to_string());
        // Expose graphics/display capabilities as well as compute
        args.push("--env".to_string());
        args.push("NVIDIA_DRIVER_CAPABILITIES=all".to_string());
    }

    args.push("--ipc".to_string());
    args.push(config.ipc().to_string());

    if let Some(shm) = config.shm_size.as_deref() {
        args.push("--shm-size".to_string());
        args.push(shm.to_string());
    }

    for port in config.ports() {
        args.push("-p".to_string());
        args.push(port.publish_arg());
    }

    args.push("--mount".to_string());
    args.push(bind_mount(plan.src_dir, config.src_target()));
    args.push("--mount".to_string());
    args.push(bind_mount(&plan.storage_dir, config.storage_target()));

    if let Some(key) = &plan.public_key {
        args.push("--env".to_string());
        args.push(format!("{}={}", PUBLIC_KEY_ENV, key));
    }

    for entry in config.env() {
        args.push("--env".to_string());
        args.push(entry.to_string());
    }

    args.push(plan.image.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PortMapping, Protocol};

    fn plan<'a>(config: &'a Config, key: Option<&str>) -> RunPlan<'a> {
        RunPlan {
            image: "ml-sandbox:latest",
            src_dir: Path::new("/home/me/project"),
            storage_dir: PathBuf::from("/home/me/sandbox-storage/ml-sandbox-latest"),
            public_key: key.map(str::to_string),
            config,
        }
    }

    fn flag_values<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn default_plan_publishes_the_full_port_table() {
        let config = Config::default();
        let args = build_run_args(&plan(&config, None));

        assert_eq!(&args[..2], &["run", "-d"]);
        assert_eq!(
            flag_values(&args, "-p"),
            vec![
                "8080:8080/tcp",
                "8081:8081/tcp",
                "5900:5900/tcp",
                "8894:8894/tcp",
                "8265:8265/tcp",
                "6006:6006/tcp",
            ]
        );
        assert_eq!(args.last().map(String::as_str), Some("ml-sandbox:latest"));
    }

    #[test]
    fn default_plan_requests_gpus_and_host_ipc() {
        let config = Config::default();
        let args = build_run_args(&plan(&config, None));

        assert_eq!(flag_values(&args, "--gpus"), vec!["all"]);
        assert_eq!(flag_values(&args, "--ipc"), vec!["host"]);
        assert!(flag_values(&args, "--env").contains(&"NVIDIA_DRIVER_CAPABILITIES=all"));
        assert!(flag_values(&args, "--shm-size").is_empty());
    }

    #[test]
    fn gpu_flags_are_omitted_when_disabled() {
        let config = Config {
            gpus: Some(false),
            ..Default::default()
        };
        let args = build_run_args(&plan(&config, None));

        assert!(!args.iter().any(|a| a == "--gpus"));
        assert!(!args.iter().any(|a| a.starts_with("NVIDIA_DRIVER_CAPABILITIES")));
    }

    #[test]
    fn mounts_source_and_storage() {
        let config = Config::default();
        let args = build_run_args(&plan(&config, None));

        assert_eq!(
            flag_values(&args, "--mount"),
            vec![
                "type=bind,source=/home/me/project,target=/src",
                "type=bind,source=/home/me/sandbox-storage/ml-sandbox-latest,target=/storage",
            ]
        );
    }

    #[test]
    fn public_key_is_passed_through_env() {
        let config = Config::default();
        let args = build_run_args(&plan(&config, Some("ssh-ed25519 AAAAC3 me@laptop")));

        assert!(
            flag_values(&args, "--env").contains(&"SSH_PUBLIC_KEY=ssh-ed25519 AAAAC3 me@laptop")
        );
    }

    #[test]
    fn no_key_env_without_a_key() {
        let config = Config::default();
        let args = build_run_args(&plan(&config, None));
        assert!(!args.iter().any(|a| a.starts_with("SSH_PUBLIC_KEY=")));
    }

    #[test]
    fn config_overrides_flow_into_args() {
        let config = Config {
            ipc: Some("private".into()),
            shm_size: Some("16g".into()),
            ports: Some(vec![PortMapping {
                host: 2222,
                container: 22,
                protocol: Protocol::Tcp,
                label: None,
            }]),
            src_target: Some("/workspace".into()),
            env: Some(vec!["WANDB_MODE=offline".into()]),
            ..Default::default()
        };
        let args = build_run_args(&plan(&config, None));

        assert_eq!(flag_values(&args, "--ipc"), vec!["private"]);
        assert_eq!(flag_values(&args, "--shm-size"), vec!["16g"]);
        assert_eq!(flag_values(&args, "-p"), vec!["2222:22/tcp"]);
        assert!(flag_values(&args, "--mount")[0].ends_with("target=/workspace"));
        assert!(flag_values(&args, "--env").contains(&"WANDB_MODE=offline"));
    }

    #[test]
    fn storage_dir_is_named_after_the_image() {
        assert_eq!(storage_dir_name("nvidia/ml:1.2"), "nvidia-ml-1-2");
        assert_eq!(storage_dir_name("Sandbox"), "sandbox");
        assert_eq!(storage_dir_name("///"), "default");
        assert_eq!(
            storage_dir(Path::new("/data"), "org/img:tag"),
            PathBuf::from("/data/org-img-tag")
        );
    }
}
