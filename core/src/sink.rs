//! Aggregate sinks — where recomputed snapshots are materialized.
//!
//! A sink always receives the complete snapshot and replaces whatever it
//! held before; nothing is merged.

use crate::{aggregate::AggregateSnapshot, error::EtlResult};
use serde::Serialize;
use std::any::Any;
use std::fs;
use std::path::{Path, PathBuf};

pub const MERCHANT_FILE: &str = "merchant_aggregates.json";
pub const ACCOUNT_FILE: &str = "account_aggregates.json";

pub trait AggregateSink: Send {
    fn name(&self) -> &'static str;

    /// Replace the previous snapshot with `snapshot`.
    fn write(&mut self, snapshot: &AggregateSnapshot) -> EtlResult<()>;

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

/// Writes two JSON arrays into a directory, one per grouping.
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn merchant_path(&self) -> PathBuf {
        self.dir.join(MERCHANT_FILE)
    }

    pub fn account_path(&self) -> PathBuf {
        self.dir.join(ACCOUNT_FILE)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

fn write_temp<T: Serialize>(path: &Path, rows: &T) -> EtlResult<PathBuf> {
    let tmp = temp_path(path);
    let body = serde_json::to_vec_pretty(rows)?;
    fs::write(&tmp, body)?;
    Ok(tmp)
}

impl AggregateSink for JsonDirSink {
    fn name(&self) -> &'static str {
        "json_dir"
    }

    fn write(&mut self, snapshot: &AggregateSnapshot) -> EtlResult<()> {
        fs::create_dir_all(&self.dir)?;
        // Stage both files before replacing either.
        let merchant_tmp = write_temp(&self.merchant_path(), &snapshot.merchants)?;
        let account_tmp = match write_temp(&self.account_path(), &snapshot.accounts) {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = fs::remove_file(&merchant_tmp);
                return Err(e);
            }
        };
        fs::rename(&merchant_tmp, self.merchant_path())?;
        fs::rename(&account_tmp, self.account_path())?;
        log::debug!("snapshot written to {}", self.dir.display());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Keeps the latest snapshot in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub latest: Option<AggregateSnapshot>,
    pub writes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write(&mut self, snapshot: &AggregateSnapshot) -> EtlResult<()> {
        self.latest = Some(snapshot.clone());
        self.writes += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AccountAggregate;
    use rust_decimal::Decimal;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fracwatch-sink-{tag}-{}",
            uuid::Uuid::new_v4()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn account(n: &str) -> AccountAggregate {
        AccountAggregate {
            account_number: n.into(),
            max_transaction_amount: Decimal::new(1000, 2),
            avg_amount: Decimal::new(1000, 2),
            stddev_amount: Some(0.0),
            total_transactions_amount: Decimal::new(1000, 2),
            fractioned_transaction_counts: 0,
            matching_fractioned_max_amts: 0,
            fractioned_max_amt_match_ratio: None,
        }
    }

    #[test]
    fn json_sink_replaces_previous_snapshot() {
        let dir = scratch_dir("replace");
        let mut sink = JsonDirSink::new(&dir);

        let first = AggregateSnapshot {
            merchants: vec![],
            accounts: vec![account("a1"), account("a2")],
        };
        sink.write(&first).unwrap();
        let second = AggregateSnapshot {
            merchants: vec![],
            accounts: vec![account("a3")],
        };
        sink.write(&second).unwrap();

        let body = fs::read_to_string(sink.account_path()).unwrap();
        let rows: Vec<AccountAggregate> = serde_json::from_str(&body).unwrap();
        assert_eq!(rows, second.accounts);
        assert!(sink.merchant_path().exists());
        assert!(!dir.join("account_aggregates.json.tmp").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_account_write_keeps_previous_pair() {
        let dir = scratch_dir("partial");
        let mut sink = JsonDirSink::new(&dir);
        let first = AggregateSnapshot {
            merchants: vec![],
            accounts: vec![account("a1")],
        };
        sink.write(&first).unwrap();
        let merchants_before = fs::read_to_string(sink.merchant_path()).unwrap();

        // A directory squatting on the account temp path makes that write fail.
        fs::create_dir_all(temp_path(&sink.account_path())).unwrap();
        let second = AggregateSnapshot {
            merchants: vec![crate::aggregate::MerchantAggregate {
                merchant_id: "m-1".into(),
                subsidiary: None,
                max_transaction_amount: Decimal::new(500, 2),
                percentile_90: Decimal::new(500, 2),
                avg_amount: Decimal::new(500, 2),
                stddev_amount: Some(0.0),
                total_transactions_amount: Decimal::new(500, 2),
                fractioned_transaction_counts: 0,
                matching_fractioned_max_amts: 0,
                fractioned_max_amt_match_ratio: None,
            }],
            accounts: vec![account("a2")],
        };
        assert!(sink.write(&second).is_err());

        assert_eq!(fs::read_to_string(sink.merchant_path()).unwrap(), merchants_before);
        assert!(!temp_path(&sink.merchant_path()).exists());
        let rows: Vec<AccountAggregate> =
            serde_json::from_str(&fs::read_to_string(sink.account_path()).unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].account_number, "a1");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn amounts_serialize_as_exact_strings() {
        let body = serde_json::to_value(account("a1")).unwrap();
        assert_eq!(body["max_transaction_amount"], "10.00");
        assert!(body["fractioned_max_amt_match_ratio"].is_null());
    }
}
