use anyhow::{Context, Result};
use tracing::{info, warn};

use pgarrow_channel::Channel;
use pgarrow_config::Config;
use pgarrow_pg::{
    ensure_publication, load_type_catalog, mask_password, PgConnection, PgwireTransport,
    ResyncScanner, ShutdownRx, SlotState, StreamDecoder, TransportConfig,
};

use crate::bridge::{is_session_error, Publisher};
use crate::channel::ConfiguredChannel;
use crate::retry::{sleep_or_shutdown, FixedBackoff, RetryPolicy};

pub async fn cmd_publish(config: &Config, shutdown: ShutdownRx) -> Result<()> {
    let channel = ConfiguredChannel::open(&config.channel)?;
    if channel.is_memory() {
        anyhow::bail!("the memory channel only connects publish and replay within one process; use `pgarrow mirror`");
    }
    run_publisher(config, channel, shutdown).await
}

/// Publish changes until shutdown, starting a new replication session
/// whenever one fails in a recoverable way.
pub async fn run_publisher<Ch: Channel>(
    config: &Config,
    channel: Ch,
    mut shutdown: ShutdownRx,
) -> Result<()> {
    let policy = FixedBackoff::from_config(&config.retry);
    let mut publisher = Publisher::new(channel, policy, shutdown.clone());
    let mut slot = SlotState::new(&config.postgres.slot_name);
    let mut failures = 0u32;

    while !shutdown.is_shutdown() {
        let published_before = publisher.published();
        match run_session(config, &mut publisher, &mut slot, shutdown.clone()).await {
            Ok(()) if shutdown.is_shutdown() => break,
            Ok(()) => warn!("Replication stream ended, reconnecting"),
            Err(e) if is_session_error(&e) => {
                warn!(error = %format!("{:#}", e), "Replication session failed, reconnecting")
            }
            Err(e) => return Err(e),
        }

        if publisher.published() > published_before {
            failures = 0;
        }
        failures += 1;
        let Some(delay) = policy.next_delay(failures) else {
            anyhow::bail!("replication session failed {} times in a row", failures);
        };
        if !sleep_or_shutdown(delay, &mut shutdown).await {
            break;
        }
    }

    info!(published = publisher.published(), "Publisher stopped");
    Ok(())
}

/// One replication session: prepare the publication and slot, resync if the
/// slot is new, then stream.
async fn run_session<Ch: Channel>(
    config: &Config,
    publisher: &mut Publisher<Ch, FixedBackoff>,
    slot: &mut SlotState,
    shutdown: ShutdownRx,
) -> Result<()> {
    let pg = &config.postgres;
    let dsn = pg.connection_string();
    info!(dsn = %mask_password(&dsn), slot = %pg.slot_name, "Starting replication session");

    let mut conn = PgConnection::connect(&dsn)
        .await
        .context("failed to connect to source database")?;

    ensure_publication(&mut conn, &pg.publication, &pg.publication_tables, pg.create_publication)
        .await
        .context("failed to prepare publication")?;
    let start_lsn = slot.start(&mut conn).await?;
    let catalog = load_type_catalog(&mut conn).await?;

    {
        let mut scanner = ResyncScanner::new(&mut conn, &catalog, &pg.publication, slot)
            .await?
            .with_batch_size(pg.resync_batch_size);
        if !publisher.resync(&mut scanner).await? {
            return Ok(());
        }
    }

    let transport = PgwireTransport::connect(&TransportConfig {
        connection_string: dsn,
        slot_name: pg.slot_name.clone(),
        publication_name: pg.publication.clone(),
        start_lsn,
        status_interval: pg.standby_timeout(),
    })
    .await?;

    let mut decoder = StreamDecoder::new(
        transport,
        conn,
        catalog,
        start_lsn,
        pg.standby_timeout(),
        shutdown,
    );
    publisher.stream(&mut decoder).await
}
