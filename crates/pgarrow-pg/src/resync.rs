//! Resync scanner for tables whose rows predate the replication slot.
//!
//! When a session creates its slot, the target has never seen the rows that
//! already exist in the published tables. The scanner pages through each
//! table and turns every row into a snapshot upsert, before any live change
//! of the session is emitted. Tables with a primary key are paged by key,
//! tables without one by `ctid`.

use std::collections::VecDeque;
use std::time::Instant;

use pgarrow_core::{
    quote_ident, quote_literal, render_value, ColumnValue, Columns, Table, Transaction, TypeCatalog,
};
use tracing::{debug, info};

use crate::catalog::{table_columns, TableColumn};
use crate::connection::{SqlConnection, TextRow};
use crate::error::PgResult;
use crate::replication::publication::publication_tables;
use crate::replication::slot::SlotState;

pub const DEFAULT_RESYNC_BATCH_SIZE: usize = 1000;

/// Progress information for a resync.
#[derive(Debug, Clone, PartialEq)]
pub struct ResyncProgress {
    pub tables_done: usize,
    pub tables_total: usize,
    pub processed_rows: u64,
    pub rows_per_second: f64,
}

impl ResyncProgress {
    /// Format as a progress line.
    pub fn format(&self) -> String {
        format!(
            "[{}/{} tables] {} rows ({:.0} rows/sec)",
            self.tables_done, self.tables_total, self.processed_rows, self.rows_per_second
        )
    }
}

/// The table currently being paged through.
struct TableScan {
    table: Table,
    columns: Vec<TableColumn>,
    /// Rendered position of the last row seen, `None` before the first page.
    after: Option<String>,
}

impl TableScan {
    fn has_key(&self) -> bool {
        self.columns.iter().any(|c| c.is_key)
    }

    fn page_query(&self, limit: usize) -> String {
        let select_list = self
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");

        let (select_list, position, order) = if self.has_key() {
            let key = self
                .columns
                .iter()
                .filter(|c| c.is_key)
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", ");
            (select_list, format!("({})", key), key)
        } else {
            (format!("{}, ctid", select_list), "ctid".to_string(), "ctid".to_string())
        };

        let filter = match &self.after {
            Some(after) => format!(" WHERE {} > {}", position, after),
            None => String::new(),
        };
        format!(
            "SELECT {} FROM {}{} ORDER BY {} LIMIT {}",
            select_list,
            self.table.qualified_name(),
            filter,
            order,
            limit
        )
    }

    /// Remember where `row` sits so the next page starts after it.
    fn advance(&mut self, row: &TextRow, catalog: &TypeCatalog) -> PgResult<()> {
        if !self.has_key() {
            self.after = row
                .value(self.columns.len())
                .map(|ctid| format!("{}::tid", quote_literal(ctid)));
            return Ok(());
        }

        let mut key = Vec::new();
        for (i, column) in self.columns.iter().enumerate().filter(|(_, c)| c.is_key) {
            let value = match row.value(i) {
                Some(text) => ColumnValue::text(text, catalog.resolve(column.type_oid)),
                None => ColumnValue::Null,
            };
            key.push(render_value(&column.name, &value)?);
        }
        self.after = Some(format!("({})", key.join(", ")));
        Ok(())
    }
}

/// Scans every published table once, one page of rows per batch.
pub struct ResyncScanner<'a, C> {
    conn: &'a mut C,
    catalog: &'a TypeCatalog,
    slot: &'a mut SlotState,
    pending: VecDeque<Table>,
    current: Option<TableScan>,
    batch_size: usize,
    tables_total: usize,
    tables_done: usize,
    processed_rows: u64,
    start_time: Instant,
}

impl<'a, C: SqlConnection> ResyncScanner<'a, C> {
    /// Prepare a scan of `publication`. Nothing is scanned unless the slot is
    /// out of sync.
    pub async fn new(
        conn: &'a mut C,
        catalog: &'a TypeCatalog,
        publication: &str,
        slot: &'a mut SlotState,
    ) -> PgResult<Self> {
        let pending: VecDeque<Table> = if slot.out_of_sync {
            publication_tables(&mut *conn, publication).await?.into()
        } else {
            VecDeque::new()
        };

        if slot.out_of_sync {
            info!(
                slot = %slot.name,
                publication = %publication,
                tables = pending.len(),
                "Slot is new, resyncing published tables"
            );
        }

        Ok(Self {
            conn,
            catalog,
            slot,
            tables_total: pending.len(),
            pending,
            current: None,
            batch_size: DEFAULT_RESYNC_BATCH_SIZE,
            tables_done: 0,
            processed_rows: 0,
            start_time: Instant::now(),
        })
    }

    /// Rows fetched per query. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn progress(&self) -> ResyncProgress {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let rows_per_second = if elapsed > 0.0 {
            self.processed_rows as f64 / elapsed
        } else {
            0.0
        };

        ResyncProgress {
            tables_done: self.tables_done,
            tables_total: self.tables_total,
            processed_rows: self.processed_rows,
            rows_per_second,
        }
    }

    /// Snapshot transactions for the next page of rows, or `None` when every
    /// table has been scanned. The slot is marked in sync at that point.
    ///
    /// An error leaves the slot out of sync, so the next session starts the
    /// resync over.
    pub async fn next_batch(&mut self) -> PgResult<Option<Vec<Transaction>>> {
        loop {
            let mut scan = match self.current.take() {
                Some(scan) => scan,
                None => match self.pending.pop_front() {
                    Some(table) => {
                        let columns = table_columns(&mut *self.conn, &table).await?;
                        if columns.is_empty() {
                            debug!(table = %table, "Table has no columns, nothing to resync");
                            self.tables_done += 1;
                            continue;
                        }
                        TableScan {
                            table,
                            columns,
                            after: None,
                        }
                    }
                    None => {
                        if self.slot.out_of_sync {
                            self.slot.mark_in_sync();
                            info!(
                                slot = %self.slot.name,
                                rows = self.processed_rows,
                                "Resync complete"
                            );
                        }
                        return Ok(None);
                    }
                },
            };

            let rows = self.conn.query(&scan.page_query(self.batch_size)).await?;
            let transactions = self.snapshot_rows(&scan, &rows)?;
            self.processed_rows += transactions.len() as u64;

            match rows.last() {
                Some(last) if rows.len() >= self.batch_size => {
                    scan.advance(last, self.catalog)?;
                    self.current = Some(scan);
                }
                _ => {
                    self.tables_done += 1;
                    debug!(
                        table = %scan.table,
                        progress = %self.progress().format(),
                        "Resynced table"
                    );
                }
            }

            if !transactions.is_empty() {
                return Ok(Some(transactions));
            }
        }
    }

    fn snapshot_rows(&self, scan: &TableScan, rows: &[TextRow]) -> PgResult<Vec<Transaction>> {
        let has_key = scan.has_key();
        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Columns::new();
            let mut key = Columns::new();
            for (i, column) in scan.columns.iter().enumerate() {
                let value = match row.value(i) {
                    Some(text) => ColumnValue::text(text, self.catalog.resolve(column.type_oid)),
                    None => ColumnValue::Null,
                };
                if column.is_key {
                    key.push(&column.name, value.clone())?;
                }
                values.push(&column.name, value)?;
            }

            transactions.push(Transaction::snapshot(
                self.slot.restart_lsn,
                scan.table.clone(),
                values,
                has_key.then_some(key),
            ));
        }
        Ok(transactions)
    }
}
