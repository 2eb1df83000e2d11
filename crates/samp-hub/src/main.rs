use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use samp_hub::config::{HubConfigOverrides, HubRuntimeConfig};
use samp_hub::runtime::HubRuntime;

#[derive(Parser)]
#[command(name = "samp-hub", version, about = "Run a SAMP message hub", long_about = None)]
struct Cli {
    /// Raise logging verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub and publish its lock record.
    Run(RunCommand),
}

#[derive(Args, Debug)]
struct RunCommand {
    /// Standard-profile port (0 picks an unused port).
    #[arg(long)]
    port: Option<u16>,
    /// Lock-record path (defaults to ~/.samp).
    #[arg(long)]
    lockfile: Option<PathBuf>,
    /// Enable the browser-facing web profile.
    #[arg(long)]
    web: bool,
    /// Web-profile port.
    #[arg(long)]
    web_port: Option<u16>,
    /// Allowed web origin; repeat for several. Empty admits any origin.
    #[arg(long = "web-origin")]
    web_origins: Vec<String>,
    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(cmd) => run_hub(cmd).await,
    }
}

fn init_tracing(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let subscriber = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
    );
    let _ = subscriber.try_init();
}

async fn run_hub(cmd: RunCommand) -> Result<()> {
    let overrides = HubConfigOverrides {
        port: cmd.port,
        lockfile: cmd.lockfile,
        web_enabled: cmd.web.then_some(true),
        web_port: cmd.web_port,
        web_origins: (!cmd.web_origins.is_empty()).then_some(cmd.web_origins),
    };
    let config = HubRuntimeConfig::from_sources(overrides, cmd.config).await?;

    let runtime = HubRuntime::start(config).await?;
    tracing::info!(
        url = %runtime.lock_info().url,
        lockfile = %runtime.lockfile_path().display(),
        "hub running; press ctrl-c to stop"
    );
    if let Some(addr) = runtime.web_addr() {
        tracing::info!(%addr, "web profile enabled");
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| anyhow::anyhow!("waiting for ctrl-c: {err}"))?;
    tracing::info!("shutting down");
    runtime.shutdown().await
}
