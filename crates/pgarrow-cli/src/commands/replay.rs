use anyhow::Result;
use tracing::info;

use pgarrow_channel::Channel;
use pgarrow_config::Config;
use pgarrow_pg::{mask_password, PgConnection, ShutdownRx};

use crate::bridge::{ErrorRules, Replayer};
use crate::channel::ConfiguredChannel;
use crate::retry::FixedBackoff;

pub async fn cmd_replay(config: &Config, shutdown: ShutdownRx) -> Result<()> {
    let channel = ConfiguredChannel::open(&config.channel)?;
    if channel.is_memory() {
        anyhow::bail!("the memory channel only connects publish and replay within one process; use `pgarrow mirror`");
    }
    run_replayer(config, channel, config.postgres.connection_string(), shutdown).await
}

/// Apply records from `channel` to the database at `target_dsn` until shutdown.
pub async fn run_replayer<Ch: Channel>(
    config: &Config,
    channel: Ch,
    target_dsn: String,
    shutdown: ShutdownRx,
) -> Result<()> {
    info!(dsn = %mask_password(&target_dsn), "Replaying into target database");
    for (code, reason) in &config.postgres.skip_errors {
        info!(code = %code, reason = %reason, "Configured skippable error");
    }

    // Connects lazily on the first statement.
    let target = PgConnection::new(target_dsn);
    let mut replayer = Replayer::new(
        channel,
        target,
        ErrorRules::from_config(&config.postgres),
        FixedBackoff::from_config(&config.retry),
        shutdown,
    );
    replayer.run().await?;
    Ok(())
}
