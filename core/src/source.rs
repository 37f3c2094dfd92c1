//! Source readers — time-bounded slices of raw transactions.
//!
//! Contract: `read(start, end)` returns every row with
//! `start <= transaction_date < end`. Order is not guaranteed; the
//! labeler does not depend on it.

use crate::{
    error::{EtlError, EtlResult},
    model::{format_date, format_timestamp, Transaction},
    store::{decimal_from_value, timestamp_at},
    watermark::DateWindow,
};
use chrono::NaiveDate;
use rusqlite::{params, types::Value, Connection};
use std::any::Any;
use std::cell::Cell;

pub trait SourceReader: Send {
    fn name(&self) -> &'static str;

    fn read(&self, start: NaiveDate, end: NaiveDate) -> EtlResult<Vec<Transaction>>;

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

// ── Landing table ────────────────────────────────────────────────────────────

/// Reads the `source_transaction` table the upstream feed stages into a
/// SQLite file.
pub struct LandingTableSource {
    conn: Connection,
}

impl LandingTableSource {
    pub fn open(path: &str) -> EtlResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| EtlError::extraction(format!("cannot open landing db {path}: {e}")))?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> EtlResult<Self> {
        Ok(Self {
            conn: Connection::open(":memory:")?,
        })
    }

    /// Create the landing table if missing. Used by tooling that stages data.
    pub fn ensure_schema(&self) -> EtlResult<()> {
        self.conn.execute_batch(include_str!(
            "../../migrations/landing/001_source_transaction.sql"
        ))?;
        Ok(())
    }

    /// Stage rows into the landing table in one transaction.
    pub fn stage(&mut self, rows: &[Transaction]) -> EtlResult<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO source_transaction (
                    _id, merchant_id, subsidiary, transaction_date,
                    account_number, user_id, transaction_amount, transaction_type
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for t in rows {
                stmt.execute(params![
                    &t.id,
                    &t.merchant_id,
                    &t.subsidiary,
                    format_timestamp(&t.transaction_date),
                    &t.account_number,
                    &t.user_id,
                    t.transaction_amount.to_string(),
                    &t.transaction_type,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Raw connection, for feeds that stage with their own SQL.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query(&self, start: NaiveDate, end: NaiveDate) -> rusqlite::Result<Vec<(Transaction, Value)>> {
        // Bare-date bounds compare correctly against stored timestamps:
        // '2021-01-05' < '2021-01-05 00:00:00'.
        let mut stmt = self.conn.prepare(
            "SELECT _id, merchant_id, subsidiary, transaction_date, account_number,
                    user_id, transaction_amount, transaction_type
             FROM source_transaction
             WHERE transaction_date >= ?1 AND transaction_date < ?2",
        )?;
        let rows = stmt.query_map(params![format_date(&start), format_date(&end)], |row| {
            Ok((
                Transaction {
                    id: row.get(0)?,
                    merchant_id: row.get(1)?,
                    subsidiary: row.get(2)?,
                    transaction_date: timestamp_at(row, 3)?,
                    account_number: row.get(4)?,
                    user_id: row.get(5)?,
                    transaction_amount: Default::default(),
                    transaction_type: row.get(7)?,
                },
                row.get::<_, Value>(6)?,
            ))
        })?;
        rows.collect()
    }
}

impl SourceReader for LandingTableSource {
    fn name(&self) -> &'static str {
        "landing_table"
    }

    fn read(&self, start: NaiveDate, end: NaiveDate) -> EtlResult<Vec<Transaction>> {
        let window = DateWindow::new(start, end)?;
        let raw = self
            .query(start, end)
            .map_err(|e| EtlError::extraction(format!("landing query {window} failed: {e}")))?;
        raw.into_iter()
            .map(|(mut txn, amount)| {
                txn.transaction_amount = decimal_from_value(amount).map_err(|e| {
                    EtlError::extraction(format!("row {}: {e}", txn.id))
                })?;
                Ok(txn)
            })
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── In memory ────────────────────────────────────────────────────────────────

/// Fixed rows held in memory. Counts reads so callers can assert that a
/// pass did not touch the source.
#[derive(Debug, Default)]
pub struct MemorySource {
    rows: Vec<Transaction>,
    reads: Cell<usize>,
    fail_with: Option<String>,
}

impl MemorySource {
    pub fn new(rows: Vec<Transaction>) -> Self {
        Self {
            rows,
            reads: Cell::new(0),
            fail_with: None,
        }
    }

    /// Every read fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl SourceReader for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(&self, start: NaiveDate, end: NaiveDate) -> EtlResult<Vec<Transaction>> {
        self.reads.set(self.reads.get() + 1);
        if let Some(reason) = &self.fail_with {
            return Err(EtlError::extraction(reason.clone()));
        }
        let window = DateWindow::new(start, end)?;
        Ok(self
            .rows
            .iter()
            .filter(|t| window.contains(&t.transaction_date))
            .cloned()
            .collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
