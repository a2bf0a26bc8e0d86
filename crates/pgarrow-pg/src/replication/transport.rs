//! The replication connection: raw WAL messages in, standby status out.
//!
//! The pgwire-replication client handles the streaming protocol; the stream
//! decoder only sees [`WireMessage`]s through the [`ReplicationTransport`] seam.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use pgwire_replication::{ReplicationClient, ReplicationConfig as PgwireConfig, ReplicationEvent};
use tracing::{debug, info, warn};

use super::lsn::format_lsn;
use crate::connect::ConnectionParams;
use crate::error::{PgError, PgResult};

/// A message received on the replication connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A pgoutput message starting at `wal_start`.
    XLogData { wal_start: u64, data: Bytes },
    /// Server heartbeat.
    Keepalive { wal_end: u64, reply_requested: bool },
}

pub trait ReplicationTransport: Send {
    /// Next message, or `None` once the server ends the stream.
    fn recv(&mut self) -> impl Future<Output = PgResult<Option<WireMessage>>> + Send;

    /// Report `lsn` as written, flushed and applied.
    fn send_standby_status(&mut self, lsn: u64) -> impl Future<Output = PgResult<()>> + Send;
}

/// Settings for opening a replication connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connection_string: String,
    pub slot_name: String,
    pub publication_name: String,
    pub start_lsn: u64,
    pub status_interval: Duration,
}

/// Replication connection backed by pgwire-replication.
pub struct PgwireTransport {
    client: ReplicationClient,
}

impl PgwireTransport {
    pub async fn connect(config: &TransportConfig) -> PgResult<Self> {
        let params = ConnectionParams::parse(&config.connection_string)?;

        debug!(
            host = %params.host,
            port = params.port,
            user = %params.user,
            database = %params.database,
            sslmode = ?params.sslmode,
            "Parsed connection parameters for pgwire-replication"
        );

        let tls = params.replication_tls();
        let pgwire_config = PgwireConfig {
            host: params.host,
            port: params.port,
            user: params.user,
            password: params.password,
            database: params.database,
            slot: config.slot_name.clone(),
            publication: config.publication_name.clone(),
            start_lsn: pgwire_replication::Lsn::from(config.start_lsn),
            stop_at_lsn: None,
            status_interval: config.status_interval,
            idle_wakeup_interval: Duration::from_secs(10),
            buffer_events: 8192,
            tls,
        };

        let client = ReplicationClient::connect(pgwire_config).await.map_err(|e| {
            warn!(error = %e, "pgwire-replication connection failed");
            PgError::Replication(e.to_string())
        })?;

        info!(
            slot = %config.slot_name,
            publication = %config.publication_name,
            start_lsn = %format_lsn(config.start_lsn),
            "Replication stream started"
        );
        Ok(Self { client })
    }
}

impl ReplicationTransport for PgwireTransport {
    fn recv(&mut self) -> impl Future<Output = PgResult<Option<WireMessage>>> + Send {
        async move {
            loop {
                let event = self
                    .client
                    .recv()
                    .await
                    .map_err(|e| PgError::Replication(e.to_string()))?;

                let Some(event) = event else {
                    info!("Replication stream ended");
                    return Ok(None);
                };

                match event {
                    // The walsender puts the record position in both header
                    // fields of a logical XLogData message.
                    ReplicationEvent::XLogData { wal_end, data, .. } => {
                        return Ok(Some(WireMessage::XLogData {
                            wal_start: wal_end.into(),
                            data: Bytes::from(data),
                        }));
                    }
                    ReplicationEvent::KeepAlive {
                        wal_end,
                        reply_requested,
                        ..
                    } => {
                        return Ok(Some(WireMessage::Keepalive {
                            wal_end: wal_end.into(),
                            reply_requested,
                        }));
                    }
                    ReplicationEvent::StoppedAt { reached } => {
                        info!(lsn = %format_lsn(reached.into()), "Stream stopped");
                        return Ok(None);
                    }
                    ReplicationEvent::Begin { xid, .. } => {
                        debug!(xid, "Transaction begin");
                    }
                    ReplicationEvent::Commit { end_lsn, .. } => {
                        debug!(lsn = %format_lsn(end_lsn.into()), "Transaction commit");
                    }
                }
            }
        }
    }

    fn send_standby_status(&mut self, lsn: u64) -> impl Future<Output = PgResult<()>> + Send {
        async move {
            self.client
                .update_applied_lsn(pgwire_replication::Lsn::from(lsn));
            Ok(())
        }
    }
}

/// A scripted transport for tests.
///
/// Hands out queued messages in order and then reports end of stream, or
/// waits forever if [`MockTransport::hold_open`] was called.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

#[derive(Default)]
struct MockTransportState {
    messages: VecDeque<PgResult<WireMessage>>,
    acks: Vec<u64>,
    hold_open: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: WireMessage) {
        self.state.lock().unwrap().messages.push_back(Ok(message));
    }

    /// Queue a data message.
    pub fn push_data(&self, wal_start: u64, data: impl Into<Bytes>) {
        self.push(WireMessage::XLogData {
            wal_start,
            data: data.into(),
        });
    }

    pub fn push_error(&self, error: PgError) {
        self.state.lock().unwrap().messages.push_back(Err(error));
    }

    /// Block instead of ending the stream once the queue is drained.
    pub fn hold_open(&self) {
        self.state.lock().unwrap().hold_open = true;
    }

    /// Positions reported through standby status updates.
    pub fn acks(&self) -> Vec<u64> {
        self.state.lock().unwrap().acks.clone()
    }
}

impl ReplicationTransport for MockTransport {
    fn recv(&mut self) -> impl Future<Output = PgResult<Option<WireMessage>>> + Send {
        let state = self.state.clone();
        async move {
            let (next, hold_open) = {
                let mut state = state.lock().unwrap();
                (state.messages.pop_front(), state.hold_open)
            };
            match next {
                Some(message) => message.map(Some),
                None if hold_open => std::future::pending().await,
                None => Ok(None),
            }
        }
    }

    fn send_standby_status(&mut self, lsn: u64) -> impl Future<Output = PgResult<()>> + Send {
        let state = self.state.clone();
        async move {
            state.lock().unwrap().acks.push(lsn);
            Ok(())
        }
    }
}
