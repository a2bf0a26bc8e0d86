use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use pgarrow_channel::Channel;
use pgarrow_core::Transaction;
use pgarrow_pg::{format_lsn, ReplicationTransport, ResyncScanner, ShutdownRx, SqlConnection, StreamDecoder};

use super::describe;
use crate::retry::{sleep_or_shutdown, RetryPolicy};

/// Outbound half of the bridge: serializes transactions and publishes them,
/// retrying while the broker is unavailable.
pub struct Publisher<Ch, P> {
    channel: Ch,
    policy: P,
    shutdown: ShutdownRx,
    published: u64,
}

impl<Ch: Channel, P: RetryPolicy> Publisher<Ch, P> {
    pub fn new(channel: Ch, policy: P, shutdown: ShutdownRx) -> Self {
        Self {
            channel,
            policy,
            shutdown,
            published: 0,
        }
    }

    /// Records published so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Publish one transaction.
    ///
    /// Transient channel errors reopen the channel and retry after the
    /// policy's delay. Returns `false` if shutdown interrupted the retries,
    /// in which case the transaction was not published.
    pub async fn publish(&mut self, transaction: &Transaction) -> Result<bool> {
        transaction
            .validate()
            .with_context(|| format!("refusing to publish {}", describe(transaction)))?;
        let payload = transaction.to_bytes()?;

        let mut failures = 0u32;
        loop {
            let err = match self.channel.publish(payload.clone()).await {
                Ok(()) => {
                    self.published += 1;
                    debug!(
                        lsn = %format_lsn(transaction.lsn),
                        op = %transaction.op,
                        bytes = payload.len(),
                        "Published transaction"
                    );
                    return Ok(true);
                }
                Err(e) if e.is_transient() => e,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to publish {}", describe(transaction)))
                }
            };

            failures += 1;
            let Some(delay) = self.policy.next_delay(failures) else {
                return Err(err).with_context(|| {
                    format!("channel still unavailable after {} attempts", failures)
                });
            };
            warn!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Channel unavailable, reopening"
            );

            if let Err(e) = self.channel.reopen().await {
                if !e.is_transient() {
                    return Err(e).context("failed to reopen channel");
                }
                debug!(error = %e, "Reopen failed, will retry");
            }
            if !sleep_or_shutdown(delay, &mut self.shutdown).await {
                return Ok(false);
            }
        }
    }

    /// Publish every snapshot row the scanner produces. Returns `false` if
    /// shutdown interrupted the resync.
    pub async fn resync<C: SqlConnection>(
        &mut self,
        scanner: &mut ResyncScanner<'_, C>,
    ) -> Result<bool> {
        while let Some(batch) = scanner.next_batch().await.context("resync failed")? {
            for transaction in &batch {
                if self.shutdown.is_shutdown() || !self.publish(transaction).await? {
                    return Ok(false);
                }
            }
        }

        let progress = scanner.progress();
        if progress.tables_total > 0 {
            info!(progress = %progress.format(), "Resync published");
        }
        Ok(true)
    }

    /// Publish live changes until shutdown or the server ends the stream.
    pub async fn stream<T, C>(&mut self, decoder: &mut StreamDecoder<T, C>) -> Result<()>
    where
        T: ReplicationTransport,
        C: SqlConnection,
    {
        while let Some(transaction) = decoder.next_transaction().await? {
            if !self.publish(&transaction).await? {
                break;
            }
            if self.published % 1000 == 0 {
                info!(
                    published = self.published,
                    lsn = %format_lsn(decoder.cursor().position),
                    "Progress"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pgarrow_channel::{ChannelError, MemoryChannel};
    use pgarrow_core::{ColumnType, ColumnValue, Columns, Table, TypeCatalog, TypeCategory};
    use pgarrow_pg::{create_shutdown_channel, MockConnection, MockTransport, SlotState, TextRow};

    use crate::retry::FixedBackoff;

    fn insert(id: &str) -> Transaction {
        let int4 = ColumnType::new(23, "int4", TypeCategory::Numeric);
        let values = Columns::new().with("id", ColumnValue::text(id, int4)).unwrap();
        Transaction::insert(0x10, Table::new("public", "t"), values)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_publish_exactly_once() {
        let channel = MemoryChannel::new();
        channel.fail_next_publish(ChannelError::Unavailable("broker down".into()));
        channel.fail_next_publish(ChannelError::Unavailable("broker down".into()));
        let (_tx, rx) = create_shutdown_channel();

        let mut publisher = Publisher::new(
            channel.clone(),
            FixedBackoff::new(Duration::from_secs(1), 0),
            rx,
        );
        let started = tokio::time::Instant::now();
        assert!(publisher.publish(&insert("1")).await.unwrap());

        assert_eq!(channel.publish_attempts(), 3);
        assert_eq!(channel.published().len(), 1);
        assert_eq!(channel.reopens(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(publisher.published(), 1);

        let record = Transaction::from_bytes(&channel.published()[0]).unwrap();
        assert_eq!(record, insert("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let channel = MemoryChannel::new();
        for _ in 0..3 {
            channel.fail_next_publish(ChannelError::Unavailable("broker down".into()));
        }
        let (_tx, rx) = create_shutdown_channel();

        let mut publisher =
            Publisher::new(channel.clone(), FixedBackoff::new(Duration::from_millis(10), 2), rx);
        assert!(publisher.publish(&insert("1")).await.is_err());
        assert_eq!(channel.publish_attempts(), 2);
        assert!(channel.published().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let channel = MemoryChannel::new();
        channel.fail_next_publish(ChannelError::Publish("message too large".into()));
        let (_tx, rx) = create_shutdown_channel();

        let mut publisher =
            Publisher::new(channel.clone(), FixedBackoff::new(Duration::from_secs(1), 0), rx);
        assert!(publisher.publish(&insert("1")).await.is_err());
        assert_eq!(channel.publish_attempts(), 1);
        assert_eq!(channel.reopens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_retry() {
        let channel = MemoryChannel::new();
        channel.fail_next_publish(ChannelError::Unavailable("broker down".into()));
        let (tx, rx) = create_shutdown_channel();
        tx.shutdown();

        let mut publisher =
            Publisher::new(channel.clone(), FixedBackoff::new(Duration::from_secs(60), 0), rx);
        assert!(!publisher.publish(&insert("1")).await.unwrap());
        assert!(channel.published().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_transaction_is_rejected() {
        let channel = MemoryChannel::new();
        let (_tx, rx) = create_shutdown_channel();
        let mut publisher =
            Publisher::new(channel.clone(), FixedBackoff::new(Duration::from_secs(1), 0), rx);

        let truncate = Transaction::truncate(1, Vec::new());
        assert!(publisher.publish(&truncate).await.is_err());
        assert_eq!(channel.publish_attempts(), 0);
    }

    #[tokio::test]
    async fn test_resync_then_stream() {
        let mut source = MockConnection::new();
        source.respond(
            "FROM pg_publication_tables",
            vec![TextRow::from_pairs([
                ("schemaname", Some("public")),
                ("tablename", Some("t")),
            ])],
        );
        source.respond(
            "FROM pg_catalog.pg_attribute",
            vec![TextRow::from_pairs([
                ("attname", Some("id")),
                ("atttypid", Some("23")),
                ("is_key", Some("t")),
            ])],
        );
        source.respond(
            r#"FROM "public"."t""#,
            vec![TextRow::from_pairs([("id", Some("7"))])],
        );

        let catalog = TypeCatalog::with_builtin_types();
        let mut slot = SlotState::new("pgarrow");
        slot.out_of_sync = true;
        slot.restart_lsn = 0x20;

        let channel = MemoryChannel::new();
        let (_tx, rx) = create_shutdown_channel();
        let mut publisher = Publisher::new(
            channel.clone(),
            FixedBackoff::new(Duration::from_secs(1), 0),
            rx.clone(),
        );

        let mut scanner = ResyncScanner::new(&mut source, &catalog, "pgarrow", &mut slot)
            .await
            .unwrap();
        assert!(publisher.resync(&mut scanner).await.unwrap());
        drop(scanner);
        assert!(!slot.out_of_sync);

        // An empty transport ends the stream right away.
        let mut decoder = StreamDecoder::new(
            MockTransport::new(),
            source.clone(),
            catalog,
            slot.restart_lsn,
            Duration::from_secs(10),
            rx,
        );
        publisher.stream(&mut decoder).await.unwrap();

        let published = channel.published();
        assert_eq!(published.len(), 1);
        let record = Transaction::from_bytes(&published[0]).unwrap();
        assert!(record.snapshot);
        assert_eq!(record.lsn, 0x20);
        assert_eq!(
            record.to_sql().unwrap(),
            r#"INSERT INTO "public"."t" ("id") VALUES (7) ON CONFLICT ("id") DO NOTHING"#
        );
    }
}
