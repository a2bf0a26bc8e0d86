use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod bridge;
mod channel;
mod cli;
mod commands;
mod env;
mod retry;

use cli::{Cli, Commands};
use pgarrow_config::Config;
use pgarrow_pg::{create_shutdown_channel, ShutdownTx};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env::load_dotenv(cli.env.as_deref())?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    init_tracing(cli.debug || config.debug)?;

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    tokio::spawn(shutdown_on_ctrl_c(shutdown_tx));

    let result = match cli.command {
        Commands::Publish => commands::cmd_publish(&config, shutdown_rx).await,
        Commands::Replay => commands::cmd_replay(&config, shutdown_rx).await,
        Commands::Mirror { target } => commands::cmd_mirror(&config, target, shutdown_rx).await,
        Commands::Status => commands::cmd_status(&config).await,
    };

    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), "Exiting");
    }
    result
}

/// Log to stderr, filtered by RUST_LOG on top of a pgarrow default.
fn init_tracing(debug: bool) -> Result<()> {
    let default = if debug { "pgarrow=debug" } else { "pgarrow=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(default.parse()?))
        .init();
    Ok(())
}

async fn shutdown_on_ctrl_c(shutdown: ShutdownTx) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
        // Keep the sender alive; dropping it would stop every loop.
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    shutdown.shutdown();
}

