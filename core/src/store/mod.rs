//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the ETL database.
//! Pipeline stages call store methods; they never execute SQL directly.
//! Transactions and fractioned rows are append-only.

mod columns;
mod run;

pub(crate) use columns::{decimal_at, decimal_from_value, timestamp_at};
pub use run::{EtlRunRow, RunStatus};

use crate::{
    error::{EtlError, EtlResult},
    labeler::LabeledBatch,
    model::{format_timestamp, FractionedTransaction, LabeledAmount, Transaction},
    types::ClusterLabel,
};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::time::Duration;

pub struct EtlStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

/// Rows written by one committed load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadCounts {
    pub transactions: usize,
    pub fractioned: usize,
}

impl EtlStore {
    pub fn open(path: &str) -> EtlResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EtlResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> EtlResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EtlResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_transactions.sql"))?;
        Ok(())
    }

    // ── Watermark / counter reads ─────────────────────────────────

    /// Most recent persisted `transaction_date`, or None for an empty store.
    pub fn latest_transaction_date(&self) -> EtlResult<Option<NaiveDateTime>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_date FROM transactions
             ORDER BY transaction_date DESC LIMIT 1",
        )?;
        let latest = stmt.query_row([], |row| timestamp_at(row, 0)).optional()?;
        Ok(latest)
    }

    /// Highest label ever issued, 0 when none exists.
    pub fn max_label(&self) -> EtlResult<ClusterLabel> {
        Ok(max_label_in(&self.conn)?)
    }

    /// How long a writer waits for another connection's write lock before
    /// failing with `SQLITE_BUSY`.
    pub fn set_busy_timeout(&self, timeout: Duration) -> EtlResult<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    // ── Load ──────────────────────────────────────────────────────

    /// Append both row sets in one SQLite transaction.
    ///
    /// Any failure rolls the whole batch back and surfaces as
    /// `EtlError::Load` with the database cause attached.
    pub fn load(
        &mut self,
        transactions: &[Transaction],
        fractioned: &[FractionedTransaction],
    ) -> EtlResult<LoadCounts> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(EtlError::Load)?;
        insert_batch(&tx, transactions, fractioned).map_err(EtlError::Load)?;
        tx.commit().map_err(EtlError::Load)?;

        Ok(LoadCounts {
            transactions: transactions.len(),
            fractioned: fractioned.len(),
        })
    }

    /// Label and append a batch under the database write lock.
    ///
    /// `BEGIN IMMEDIATE` takes the lock before the label counter is read, so
    /// no other connection can commit between the read and this commit.
    /// `label` receives the highest persisted label.
    pub fn load_labeled<F>(&mut self, label: F) -> EtlResult<(LabeledBatch, LoadCounts)>
    where
        F: FnOnce(ClusterLabel) -> LabeledBatch,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(EtlError::Load)?;
        let last_label = max_label_in(&tx).map_err(EtlError::Load)?;
        let batch = label(last_label);
        insert_batch(&tx, &batch.transactions, &batch.fractioned).map_err(EtlError::Load)?;
        tx.commit().map_err(EtlError::Load)?;

        let counts = LoadCounts {
            transactions: batch.transactions.len(),
            fractioned: batch.fractioned.len(),
        };
        Ok((batch, counts))
    }

    // ── Aggregation input ─────────────────────────────────────────

    /// Every persisted transaction, left-joined to its cluster label.
    pub fn labeled_amounts(&self) -> EtlResult<Vec<LabeledAmount>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.merchant_id, t.subsidiary, t.account_number,
                    t.transaction_amount, f.transaction_label
             FROM transactions t
             LEFT JOIN fractioned_transactions f ON f.transaction_id = t._id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LabeledAmount {
                merchant_id: row.get(0)?,
                subsidiary: row.get(1)?,
                account_number: row.get(2)?,
                amount: decimal_at(row, 3)?,
                label: row.get::<_, Option<i64>>(4)?.map(|l| l as ClusterLabel),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Queries used by tooling and tests ─────────────────────────

    pub fn transaction_count(&self) -> EtlResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn fractioned_count(&self) -> EtlResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM fractioned_transactions",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn fractioned_for(&self, transaction_id: &str) -> EtlResult<Option<FractionedTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id, transaction_counts, transaction_label, transaction_total_amount
             FROM fractioned_transactions WHERE transaction_id = ?1",
        )?;
        let row = stmt
            .query_row(params![transaction_id], map_fractioned)
            .optional()?;
        Ok(row)
    }

    /// All fractioned rows ordered by label, then transaction id.
    pub fn fractioned_rows(&self) -> EtlResult<Vec<FractionedTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id, transaction_counts, transaction_label, transaction_total_amount
             FROM fractioned_transactions
             ORDER BY transaction_label ASC, transaction_id ASC",
        )?;
        let rows = stmt.query_map([], map_fractioned)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn transaction(&self, id: &str) -> EtlResult<Option<Transaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT _id, merchant_id, subsidiary, transaction_date, account_number,
                    user_id, transaction_amount, transaction_type
             FROM transactions WHERE _id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok(Transaction {
                    id: row.get(0)?,
                    merchant_id: row.get(1)?,
                    subsidiary: row.get(2)?,
                    transaction_date: timestamp_at(row, 3)?,
                    account_number: row.get(4)?,
                    user_id: row.get(5)?,
                    transaction_amount: decimal_at(row, 6)?,
                    transaction_type: row.get(7)?,
                })
            })
            .optional()?;
        Ok(row)
    }
}

fn map_fractioned(row: &rusqlite::Row<'_>) -> rusqlite::Result<FractionedTransaction> {
    Ok(FractionedTransaction {
        transaction_id: row.get(0)?,
        transaction_counts: row.get::<_, i64>(1)? as u32,
        transaction_label: row.get::<_, i64>(2)? as ClusterLabel,
        transaction_total_amount: decimal_at(row, 3)?,
    })
}

fn max_label_in(conn: &Connection) -> rusqlite::Result<ClusterLabel> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(transaction_label) FROM fractioned_transactions",
        [],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0) as ClusterLabel)
}

fn insert_batch(
    conn: &Connection,
    transactions: &[Transaction],
    fractioned: &[FractionedTransaction],
) -> rusqlite::Result<()> {
    let mut insert_txn = conn.prepare(
        "INSERT INTO transactions (
            _id, merchant_id, subsidiary, transaction_date,
            account_number, user_id, transaction_amount, transaction_type
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for t in transactions {
        insert_txn.execute(params![
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

    let mut insert_frac = conn.prepare(
        "INSERT INTO fractioned_transactions (
            transaction_id, transaction_counts, transaction_label,
            transaction_total_amount
        ) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for f in fractioned {
        insert_frac.execute(params![
            &f.transaction_id,
            f.transaction_counts as i64,
            f.transaction_label as i64,
            f.transaction_total_amount.to_string(),
        ])?;
    }
    Ok(())
}
