//! Sentra daemon
//!
//! Loads the configuration, starts the engine, and runs until
//! interrupted. Fatal startup errors map to the documented exit
//! codes so supervisors can tell misconfiguration from missing
//! capture privilege.

use clap::Parser;
use sentra_common::{Config, SentraResult};
use sentra_core::Engine;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sentra", about = "ML-driven network intrusion detection")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "sentra.json")]
    config: PathBuf,

    /// Override the capture interface from the configuration
    #[arg(long)]
    interface: Option<String>,

    /// Validate the configuration, print the effective document, and
    /// exit
    #[arg(long)]
    check_config: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

#[tokio::main]
async fn run(cli: Cli) -> SentraResult<()> {
    let mut config = Config::load(&cli.config)?;
    if let Some(interface) = cli.interface {
        config.network.interface = interface;
        config.validate()?;
    }

    if cli.check_config {
        match serde_json::to_string_pretty(&config) {
            Ok(doc) => println!("{doc}"),
            Err(e) => tracing::warn!(error = %e, "cannot render config"),
        }
        return Ok(());
    }

    let engine = Engine::start(config).await?;
    tracing::info!("sentra running, ctrl-c to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "signal handler failed, shutting down");
    }
    engine.shutdown().await;
    Ok(())
}
