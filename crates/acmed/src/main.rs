//! acmed - Main entry point
//!
//! Unattended ACME certificate issuance and renewal over http-01.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use acmed::{load, AcmedConfig, DirectoryClient, Lifecycle, Storage};

/// acmed - keep TLS certificates for configured domains valid
#[derive(Parser, Debug)]
#[command(name = "acmed")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "ACMED_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Base directory for account, key, and certificate files
    #[arg(long = "dir", default_value = ".")]
    dir: PathBuf,

    /// Listen address for http-01 challenges (overrides the config file)
    #[arg(short = 'p', long = "address")]
    address: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check every domain once and exit (default)
    Run,
    /// Keep running, re-checking all domains on an interval
    Server {
        /// Hours between renewal checks
        #[arg(long = "interval-hours", default_value_t = 24)]
        interval_hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    info!(config = %cli.config.display(), "loading configuration");
    let config = load(&cli.config, cli.address.as_deref())
        .context("failed to load configuration file")?;

    let lifecycle = Lifecycle::new(
        Arc::new(DirectoryClient::new()),
        Storage::new(&cli.dir),
        config.address,
    );

    match cli.command {
        Some(Commands::Server { interval_hours }) => {
            run_server(&lifecycle, &config, config.address, interval_hours).await
        }
        Some(Commands::Run) | None => run_once(&lifecycle, &config).await,
    }
}

/// Process every domain once.
///
/// Per-domain failures are already logged by the lifecycle and do not
/// affect the exit status; only configuration errors make the process
/// exit non-zero.
async fn run_once(lifecycle: &Lifecycle, config: &AcmedConfig) -> Result<()> {
    let results = lifecycle.run(config).await;
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        warn!(failed, total = results.len(), "run finished with failures");
    }
    Ok(())
}

/// Re-check all domains on a fixed interval, forever.
async fn run_server(
    lifecycle: &Lifecycle,
    config: &AcmedConfig,
    address: SocketAddr,
    interval_hours: u64,
) -> Result<()> {
    let interval = Duration::from_secs(interval_hours * 60 * 60);
    info!(
        address = %address,
        interval_hours,
        domains = config.webs.len(),
        "starting renewal loop"
    );

    loop {
        let results = lifecycle.run(config).await;
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            warn!(failed, total = results.len(), "run finished with failures");
        } else {
            info!(total = results.len(), "run finished");
        }
        tokio::time::sleep(interval).await;
    }
}
