use anyhow::Result;

use pgarrow_config::Config;
use pgarrow_pg::ShutdownRx;

use super::publish::run_publisher;
use super::replay::run_replayer;
use crate::channel::ConfiguredChannel;

/// Run both halves of the bridge side by side. Either side failing stops
/// the other.
pub async fn cmd_mirror(config: &Config, target: String, shutdown: ShutdownRx) -> Result<()> {
    let (outbound, inbound) = ConfiguredChannel::pair(&config.channel)?;
    let target = pgarrow_config::resolve_env(&target);

    tokio::try_join!(
        run_publisher(config, outbound, shutdown.clone()),
        run_replayer(config, inbound, target, shutdown),
    )?;
    Ok(())
}
