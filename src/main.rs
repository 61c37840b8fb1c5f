mod cli;
mod cmd;
mod config;
mod error;
mod launch;
mod logger;
mod sandbox;
mod shell;
mod spinner;

use anyhow::Result;
use tracing::{error, info};

fn main() -> Result<()> {
    // File logging is best effort; the launcher still runs without it
    if let Err(err) = logger::init() {
        eprintln!(
            "{} file logging disabled: {:#}",
            console::style("warning:").yellow().bold(),
            err
        );
    }
    info!(args = ?std::env::args().collect::<Vec<_>>(), "start-sandbox start");

    match cli::run() {
        Ok(result) => {
            info!("start-sandbox finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "start-sandbox failed");
            Err(err)
        }
    }
}
