//! Persisted row types and their text encodings.
//!
//! Amounts are exact decimals (24 digits, 8 fractional) and are stored
//! as TEXT so SQLite never rounds them through a float.

use crate::{
    error::{EtlError, EtlResult},
    types::{ClusterLabel, TransactionId},
};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Canonical storage format. Lexicographic order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub merchant_id: String,
    pub subsidiary: Option<String>,
    pub transaction_date: NaiveDateTime,
    pub account_number: String,
    pub user_id: String,
    pub transaction_amount: Decimal,
    pub transaction_type: String,
}

impl Transaction {
    /// Calendar day used for clustering. No timezone normalization.
    pub fn day(&self) -> NaiveDate {
        self.transaction_date.date()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FractionedTransaction {
    pub transaction_id: TransactionId,
    pub transaction_counts: u32,
    pub transaction_label: ClusterLabel,
    pub transaction_total_amount: Decimal,
}

/// One row of the transaction ⟕ fractioned_transaction join.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledAmount {
    pub merchant_id: String,
    pub subsidiary: Option<String>,
    pub account_number: String,
    pub amount: Decimal,
    pub label: Option<ClusterLabel>,
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Accepts `YYYY-MM-DD HH:MM:SS[.f]`, the same with a `T` separator,
/// or a bare `YYYY-MM-DD` (midnight).
pub fn parse_timestamp(raw: &str) -> EtlResult<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|_| EtlError::InvalidTimestamp {
            value: raw.to_string(),
        })
}

pub fn parse_amount(raw: &str) -> EtlResult<Decimal> {
    Decimal::from_str(raw.trim()).map_err(|e| EtlError::InvalidAmount {
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
