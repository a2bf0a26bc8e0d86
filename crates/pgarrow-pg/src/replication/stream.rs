//! Turns the raw replication stream into [`Transaction`]s.
//!
//! One decoder owns one replication session: its relation cache, type
//! catalog and cursor are never shared. Changes come out in WAL order, one
//! per call to [`StreamDecoder::next_transaction`].

use std::time::Duration;

use pgarrow_core::{Transaction, TypeCatalog, TypeCategory};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use super::columns::{extract_columns, identity_predicate};
use super::lsn::format_lsn;
use super::pgoutput::{PgOutputDecoder, PgOutputMessage};
use super::relation_cache::RelationCache;
use super::transport::{ReplicationTransport, WireMessage};
use crate::catalog::lookup_relation;
use crate::connection::SqlConnection;
use crate::error::PgResult;
use crate::shutdown::ShutdownRx;

pub const DEFAULT_STANDBY_TIMEOUT: Duration = Duration::from_secs(10);

/// Position bookkeeping for standby status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationCursor {
    /// End of the last consumed data message, or the server's WAL end from
    /// a keepalive that arrived between transactions.
    pub position: u64,
    /// When the next standby status update is due.
    pub deadline: Instant,
}

pub struct StreamDecoder<T, C> {
    transport: T,
    /// Source connection, used to resolve relations a TRUNCATE names before
    /// any Relation message for them arrived.
    conn: C,
    relations: RelationCache,
    catalog: TypeCatalog,
    decoder: PgOutputDecoder,
    cursor: ReplicationCursor,
    /// Between Begin and Commit. Keepalives only move the cursor when false.
    in_transaction: bool,
    standby_timeout: Duration,
    shutdown: ShutdownRx,
}

impl<T: ReplicationTransport, C: SqlConnection> StreamDecoder<T, C> {
    pub fn new(
        transport: T,
        conn: C,
        catalog: TypeCatalog,
        start_lsn: u64,
        standby_timeout: Duration,
        shutdown: ShutdownRx,
    ) -> Self {
        Self {
            transport,
            conn,
            relations: RelationCache::new(),
            catalog,
            decoder: PgOutputDecoder::new(),
            cursor: ReplicationCursor {
                position: start_lsn,
                deadline: Instant::now() + standby_timeout,
            },
            in_transaction: false,
            standby_timeout,
            shutdown,
        }
    }

    /// Next change from the stream.
    ///
    /// Returns `None` when shutdown is requested or the server ends the
    /// stream. Any error ends the session; the caller reconnects and resumes
    /// from the slot's confirmed position.
    pub async fn next_transaction(&mut self) -> PgResult<Option<Transaction>> {
        loop {
            if Instant::now() >= self.cursor.deadline {
                self.transport
                    .send_standby_status(self.cursor.position)
                    .await?;
                debug!(lsn = %format_lsn(self.cursor.position), "Sent standby status");
                self.cursor.deadline = Instant::now() + self.standby_timeout;
            }

            let deadline = self.cursor.deadline;
            let received = tokio::select! {
                biased;

                _ = self.shutdown.wait() => {
                    info!(lsn = %format_lsn(self.cursor.position), "Replication stream stopped by shutdown");
                    return Ok(None);
                }
                received = timeout_at(deadline, self.transport.recv()) => received,
            };

            // Nothing arrived before the deadline.
            let Ok(message) = received else {
                continue;
            };
            let Some(message) = message? else {
                return Ok(None);
            };

            match message {
                WireMessage::Keepalive {
                    wal_end,
                    reply_requested,
                } => {
                    debug!(wal_end = %format_lsn(wal_end), reply_requested, "Keepalive");
                    // Every change before wal_end has been handed out, so an
                    // idle slot can release that WAL.
                    if !self.in_transaction {
                        self.cursor.position = self.cursor.position.max(wal_end);
                    }
                    if reply_requested {
                        self.cursor.deadline = Instant::now();
                    }
                }
                WireMessage::XLogData { wal_start, data } => {
                    let transaction = self.handle_data(wal_start, &data).await?;
                    self.cursor.position = self
                        .cursor
                        .position
                        .max(wal_start.saturating_add(data.len() as u64));
                    if let Some(transaction) = transaction {
                        return Ok(Some(transaction));
                    }
                }
            }
        }
    }

    async fn handle_data(&mut self, lsn: u64, data: &[u8]) -> PgResult<Option<Transaction>> {
        let message = self.decoder.decode(data)?;
        debug!(lsn = %format_lsn(lsn), kind = message.kind(), "Decoded message");

        let transaction = match message {
            PgOutputMessage::Relation(relation) => {
                debug!(
                    relation_id = relation.relation_id,
                    table = %format!("{}.{}", relation.namespace, relation.name),
                    columns = relation.columns.len(),
                    "Relation"
                );
                self.relations.put(&relation);
                None
            }
            PgOutputMessage::Type(ty) => {
                let category = if self.catalog.contains(ty.type_id) {
                    self.catalog.resolve(ty.type_id).category
                } else {
                    TypeCategory::UserDefined
                };
                self.catalog
                    .insert_qualified(ty.type_id, ty.namespace, ty.name, category);
                None
            }
            PgOutputMessage::Begin(_) => {
                self.in_transaction = true;
                None
            }
            PgOutputMessage::Commit(_) => {
                self.in_transaction = false;
                None
            }
            PgOutputMessage::Origin(_) | PgOutputMessage::Message(_) => None,
            PgOutputMessage::Insert(insert) => {
                let relation = self.relations.get(insert.relation_id)?;
                let values = extract_columns(&insert.tuple, relation, &self.catalog)?;
                Some(Transaction::insert(lsn, relation.table(), values))
            }
            PgOutputMessage::Update(update) => {
                let relation = self.relations.get(update.relation_id)?;
                let values = extract_columns(&update.new_tuple, relation, &self.catalog)?;
                let identity = match &update.old_tuple {
                    Some(old) => identity_predicate(
                        &extract_columns(old, relation, &self.catalog)?,
                        relation,
                    )?,
                    None => identity_predicate(&values, relation)?,
                };
                Some(Transaction::update(lsn, relation.table(), values, identity))
            }
            PgOutputMessage::Delete(delete) => {
                let relation = self.relations.get(delete.relation_id)?;
                let old = extract_columns(&delete.old_tuple, relation, &self.catalog)?;
                let identity = identity_predicate(&old, relation)?;
                Some(Transaction::delete(lsn, relation.table(), identity))
            }
            PgOutputMessage::Truncate(truncate) => {
                let mut tables = Vec::with_capacity(truncate.relation_ids.len());
                for relation_id in &truncate.relation_ids {
                    let table = match self.relations.get(*relation_id) {
                        Ok(relation) => relation.table(),
                        Err(_) => lookup_relation(&mut self.conn, *relation_id).await?,
                    };
                    tables.push(table);
                }
                Some(Transaction::truncate(lsn, tables))
            }
        };

        if let Some(transaction) = &transaction {
            debug!(
                lsn = %format_lsn(lsn),
                op = %transaction.op,
                tables = transaction.tables.len(),
                "Row change"
            );
        }
        Ok(transaction)
    }

    pub fn cursor(&self) -> ReplicationCursor {
        self.cursor
    }

    pub fn relations(&self) -> &RelationCache {
        &self.relations
    }
}
