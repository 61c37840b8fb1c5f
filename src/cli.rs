use crate::config::{Config, SandboxRuntime};
use crate::launch::{self, LaunchRequest};
use crate::sandbox::runtime::CliRuntime;
use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use tracing::debug;

pub const USAGE: &str = "Usage: start-sandbox <docker_image_name> <src_folder>";

#[derive(Parser, Debug)]
#[command(author, version, long_about = None)]
#[command(name = "start-sandbox")]
#[command(about = "Start a GPU development sandbox container with SSH and VNC access")]
#[command(override_usage = "start-sandbox [OPTIONS] <docker_image_name> <src_folder>")]
struct Cli {
    /// Image to start the sandbox from
    #[arg(value_name = "docker_image_name")]
    image: String,

    /// Host folder mounted into the sandbox as /src
    #[arg(value_name = "src_folder")]
    src_folder: PathBuf,

    /// Container runtime (overrides config)
    #[arg(long, value_enum)]
    runtime: Option<SandboxRuntime>,

    /// Do not request GPU devices
    #[arg(long)]
    no_gpu: bool,

    /// Milliseconds to wait before checking the container is running
    #[arg(long, value_name = "MS")]
    readiness_delay: Option<u64>,

    /// Directory searched for the first *.pub key (default ~/.ssh)
    #[arg(long, value_name = "DIR")]
    ssh_dir: Option<PathBuf>,

    /// Config file (default $XDG_CONFIG_HOME/sandbox-launcher/config.yaml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the container runtime command instead of running it
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    /// Command-line flags take precedence over the config file.
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(runtime) = self.runtime {
            config.runtime = Some(runtime);
        }
        if self.no_gpu {
            config.gpus = Some(false);
        }
        if let Some(ms) = self.readiness_delay {
            config.readiness_delay_ms = Some(ms);
        }
        if let Some(dir) = &self.ssh_dir {
            config.ssh_dir = Some(dir.clone());
        }
    }
}

/// Outcome of argument parsing.
enum Parsed {
    Run(Box<Cli>),
    /// `--help` / `--version` output, already rendered
    Info(String),
    Usage(String),
}

fn parse<I, T>(args: I) -> Parsed
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => Parsed::Run(Box::new(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => Parsed::Info(err.to_string()),
            _ => Parsed::Usage(err.to_string()),
        },
    }
}

/// The fixed usage line followed by clap's one-line reason, e.g.
/// `error: invalid value 'dockr' for '--runtime <RUNTIME>'`.
fn usage_message(detail: &str) -> String {
    match detail.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(reason) => format!("{USAGE}\n{reason}"),
        None => USAGE.to_string(),
    }
}

pub fn run() -> Result<()> {
    let cli = match parse(std::env::args_os()) {
        Parsed::Run(cli) => cli,
        Parsed::Info(text) => {
            print!("{text}");
            return Ok(());
        }
        Parsed::Usage(detail) => {
            debug!(detail = %detail.trim(), "cli:usage error");
            eprintln!("{}", usage_message(&detail));
            std::process::exit(1);
        }
    };

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    let request = LaunchRequest {
        image: cli.image.clone(),
        src_folder: cli.src_folder.clone(),
    };

    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr();

    let prepared = launch::prepare(&request, &config, &mut stderr)?;
    if cli.dry_run {
        return launch::print_dry_run(&prepared, &config, &mut stdout);
    }

    let runtime = CliRuntime::new(config.runtime())?;
    launch::start(&prepared, &config, &runtime, &mut stdout, &mut stderr)?;
    Ok(())
}
