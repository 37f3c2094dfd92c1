//! Cluster labeling — detection of fractioned (split) transactions.
//!
//! A cluster is every transaction sharing (user_id, subsidiary, calendar
//! day). Clusters with more than one member are fractioned and receive the
//! next label. The counter is an explicit input and output so labeling is a
//! pure function of (batch, last label).
//!
//! Null subsidiaries compare equal: two rows from the same user on the same
//! day without a subsidiary cluster together.

use crate::{
    model::{FractionedTransaction, Transaction},
    types::ClusterLabel,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterKey {
    pub user_id: String,
    pub subsidiary: Option<String>,
    pub day: NaiveDate,
}

impl ClusterKey {
    pub fn of(txn: &Transaction) -> Self {
        Self {
            user_id: txn.user_id.clone(),
            subsidiary: txn.subsidiary.clone(),
            day: txn.day(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledBatch {
    pub transactions: Vec<Transaction>,
    pub fractioned: Vec<FractionedTransaction>,
    /// Highest label issued so far. Equals the input counter if no
    /// cluster was found.
    pub last_label: ClusterLabel,
}

impl LabeledBatch {
    pub fn cluster_count(&self, first_label: ClusterLabel) -> u64 {
        self.last_label - first_label
    }
}

/// Label a batch, continuing from `last_label` (0 for an empty store).
///
/// Clusters are visited in key order and members keep their input order,
/// so identical input always produces identical output.
pub fn label_batch(batch: Vec<Transaction>, last_label: ClusterLabel) -> LabeledBatch {
    let mut groups: BTreeMap<ClusterKey, Vec<usize>> = BTreeMap::new();
    for (idx, txn) in batch.iter().enumerate() {
        groups.entry(ClusterKey::of(txn)).or_default().push(idx);
    }

    let mut counter = last_label;
    let mut fractioned = Vec::new();
    for members in groups.values().filter(|m| m.len() > 1) {
        counter += 1;
        let total: Decimal = members
            .iter()
            .map(|&i| batch[i].transaction_amount)
            .sum();
        let size = members.len() as u32;
        fractioned.extend(members.iter().map(|&i| FractionedTransaction {
            transaction_id: batch[i].id.clone(),
            transaction_counts: size,
            transaction_label: counter,
            transaction_total_amount: total,
        }));
    }

    log::debug!(
        "labeled {} txns: {} clusters, {} fractioned rows, last label {}",
        batch.len(),
        counter - last_label,
        fractioned.len(),
        counter
    );

    LabeledBatch {
        transactions: batch,
        fractioned,
        last_label: counter,
    }
}
