use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use pgarrow_channel::{Channel, Delivery};
use pgarrow_config::PostgresConfig;
use pgarrow_core::Transaction;
use pgarrow_pg::{format_lsn, PgError, ShutdownRx, SqlConnection};

use super::describe;
use crate::retry::{sleep_or_shutdown, RetryPolicy};

/// How target database errors are treated during replay.
#[derive(Debug, Clone, Default)]
pub struct ErrorRules {
    /// SQLSTATE to description. Matching records are acknowledged unapplied.
    pub skip: BTreeMap<String, String>,
    /// SQLSTATEs after which the target is reconnected and the statement
    /// retried.
    pub reconnect: Vec<String>,
}

impl ErrorRules {
    pub fn from_config(config: &PostgresConfig) -> Self {
        Self {
            skip: config.skip_errors.clone(),
            reconnect: config.reconnect_errors.clone(),
        }
    }

    fn skip_reason(&self, err: &PgError) -> Option<&str> {
        err.db_code()
            .and_then(|code| self.skip.get(code))
            .map(String::as_str)
    }

    fn should_reconnect(&self, err: &PgError) -> bool {
        err.is_connection_lost()
            || err
                .db_code()
                .is_some_and(|code| self.reconnect.iter().any(|c| c == code))
    }
}

/// What happened to a consumed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Failed with a configured skippable error.
    Skipped,
    /// Shutdown arrived while waiting to retry. Not acknowledged.
    Interrupted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: u64,
    pub skipped: u64,
}

/// Inbound half of the bridge: consume, apply, then acknowledge.
///
/// A record is committed to the channel only after its statement succeeded
/// or failed with a skippable error, so a crash anywhere in between leads
/// to redelivery rather than loss.
pub struct Replayer<Ch, C, P> {
    channel: Ch,
    target: C,
    rules: ErrorRules,
    policy: P,
    shutdown: ShutdownRx,
    stats: ReplayStats,
}

impl<Ch: Channel, C: SqlConnection, P: RetryPolicy> Replayer<Ch, C, P> {
    pub fn new(channel: Ch, target: C, rules: ErrorRules, policy: P, shutdown: ShutdownRx) -> Self {
        Self {
            channel,
            target,
            rules,
            policy,
            shutdown,
            stats: ReplayStats::default(),
        }
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// Replay records until shutdown. Any error is fatal; the offending
    /// record stays unacknowledged.
    pub async fn run(&mut self) -> Result<ReplayStats> {
        let mut consume_failures = 0u32;
        loop {
            let consumed = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                consumed = self.channel.consume() => consumed,
            };

            let delivery = match consumed {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) if e.is_transient() => {
                    consume_failures += 1;
                    let Some(delay) = self.policy.next_delay(consume_failures) else {
                        return Err(e).context("channel still unavailable");
                    };
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Consume failed, reopening channel");
                    if !sleep_or_shutdown(delay, &mut self.shutdown).await {
                        break;
                    }
                    self.channel.reopen().await.context("failed to reopen channel")?;
                    continue;
                }
                Err(e) => return Err(e).context("failed to consume"),
            };
            consume_failures = 0;

            if !self.handle(delivery).await? {
                break;
            }
        }

        info!(
            applied = self.stats.applied,
            skipped = self.stats.skipped,
            "Replay stopped"
        );
        Ok(self.stats)
    }

    /// Apply and acknowledge one record. Returns `false` on shutdown.
    pub async fn handle(&mut self, delivery: Delivery) -> Result<bool> {
        match self.apply(&delivery.payload).await? {
            ApplyOutcome::Applied => self.stats.applied += 1,
            ApplyOutcome::Skipped => self.stats.skipped += 1,
            ApplyOutcome::Interrupted => return Ok(false),
        }

        match self.channel.commit(delivery.token).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                // The record is redelivered after reopening and applied again.
                warn!(error = %e, offset = delivery.token.offset, "Commit failed, reopening channel");
                self.channel.reopen().await.context("failed to reopen channel")?;
            }
            Err(e) => return Err(e).context("failed to acknowledge record"),
        }
        Ok(true)
    }

    /// Decode a record and execute its statement against the target.
    pub async fn apply(&mut self, payload: &[u8]) -> Result<ApplyOutcome> {
        let transaction = Transaction::from_bytes(payload).context("malformed record")?;
        transaction
            .validate()
            .with_context(|| format!("invalid record {}", describe(&transaction)))?;
        let sql = transaction.to_sql()?;

        let mut failures = 0u32;
        loop {
            let err = match self.target.execute(&sql).await {
                Ok(()) => {
                    debug!(
                        lsn = %format_lsn(transaction.lsn),
                        op = %transaction.op,
                        "Applied"
                    );
                    return Ok(ApplyOutcome::Applied);
                }
                Err(e) => e,
            };

            if let Some(reason) = self.rules.skip_reason(&err) {
                info!(
                    code = err.db_code().unwrap_or_default(),
                    reason = %reason,
                    record = %describe(&transaction),
                    "Skipping record"
                );
                return Ok(ApplyOutcome::Skipped);
            }

            if !self.rules.should_reconnect(&err) {
                return Err(err).with_context(|| format!("failed to apply {}", describe(&transaction)));
            }

            failures += 1;
            let Some(delay) = self.policy.next_delay(failures) else {
                return Err(err).with_context(|| {
                    format!("target still failing after {} attempts", failures)
                });
            };
            warn!(error = %err, attempt = failures, "Target connection lost, reconnecting");
            if !sleep_or_shutdown(delay, &mut self.shutdown).await {
                return Ok(ApplyOutcome::Interrupted);
            }
            if let Err(e) = self.target.reconnect().await {
                // The next execute reconnects lazily and reports the failure.
                debug!(error = %e, "Reconnect failed");
            }
        }
    }
}
