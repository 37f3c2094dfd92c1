//! Risk aggregates — full recompute over the persisted history.
//!
//! Input is every transaction left-joined to its cluster label. Two
//! snapshots come out: grouped by (merchant_id, subsidiary) and grouped by
//! account_number. Each statistic is a plain function over amounts so it
//! can be tested without a database.

use crate::{
    error::{EtlError, EtlResult},
    model::LabeledAmount,
    sink::AggregateSink,
    store::EtlStore,
    types::ClusterLabel,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantAggregate {
    pub merchant_id: String,
    pub subsidiary: Option<String>,
    pub max_transaction_amount: Decimal,
    pub percentile_90: Decimal,
    pub avg_amount: Decimal,
    pub stddev_amount: Option<f64>,
    pub total_transactions_amount: Decimal,
    pub fractioned_transaction_counts: u64,
    pub matching_fractioned_max_amts: u64,
    pub fractioned_max_amt_match_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountAggregate {
    pub account_number: String,
    pub max_transaction_amount: Decimal,
    pub avg_amount: Decimal,
    pub stddev_amount: Option<f64>,
    pub total_transactions_amount: Decimal,
    pub fractioned_transaction_counts: u64,
    pub matching_fractioned_max_amts: u64,
    pub fractioned_max_amt_match_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub merchants: Vec<MerchantAggregate>,
    pub accounts: Vec<AccountAggregate>,
}

// ── Statistics ───────────────────────────────────────────────────────────────

/// Nearest-rank 90th percentile: the value at 1-based rank
/// floor(0.9 × (n − 1)) + 1 of the ascending order. No interpolation.
pub fn percentile_90(amounts: &[Decimal]) -> Option<Decimal> {
    if amounts.is_empty() {
        return None;
    }
    let mut sorted = amounts.to_vec();
    sorted.sort();
    // floor(0.9 × (n − 1)) in integers, as a 0-based index.
    let idx = 9 * (sorted.len() - 1) / 10;
    Some(sorted[idx])
}

pub fn mean(amounts: &[Decimal]) -> Option<Decimal> {
    if amounts.is_empty() {
        return None;
    }
    let total: Decimal = amounts.iter().sum();
    Some(total / Decimal::from(amounts.len() as u64))
}

/// Population standard deviation (divisor n).
///
/// Two-pass: mean first, then mean squared deviation. Mathematically equal
/// to sqrt(E[x²] − E[x]²) without the cancellation on large amounts.
pub fn population_stddev(amounts: &[Decimal]) -> Option<f64> {
    if amounts.is_empty() {
        return None;
    }
    let xs: Vec<f64> = amounts.iter().map(|a| a.to_f64().unwrap_or(0.0)).collect();
    let n = xs.len() as f64;
    let mu = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mu) * (x - mu)).sum::<f64>() / n;
    Some(var.max(0.0).sqrt())
}

/// Cluster statistics of one group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterMatch {
    /// Distinct labels touching the group.
    pub clusters: u64,
    /// Labels whose largest member (within the group) equals `group_max`.
    pub matching: u64,
    /// matching ÷ clusters, None when there are no clusters.
    pub ratio: Option<f64>,
}

pub fn cluster_match(members: &[(Decimal, Option<ClusterLabel>)], group_max: Decimal) -> ClusterMatch {
    let mut cluster_max: HashMap<ClusterLabel, Decimal> = HashMap::new();
    for (amount, label) in members {
        if let Some(label) = label {
            let entry = cluster_max.entry(*label).or_insert(*amount);
            if *amount > *entry {
                *entry = *amount;
            }
        }
    }
    let clusters = cluster_max.len() as u64;
    let matching = cluster_max.values().filter(|m| **m == group_max).count() as u64;
    let ratio = if clusters == 0 {
        None
    } else {
        Some(matching as f64 / clusters as f64)
    };
    ClusterMatch {
        clusters,
        matching,
        ratio,
    }
}

/// Statistics shared by both snapshot kinds.
struct GroupStats {
    max: Decimal,
    avg: Decimal,
    stddev: Option<f64>,
    total: Decimal,
    clusters: ClusterMatch,
}

impl GroupStats {
    fn compute(members: &[(Decimal, Option<ClusterLabel>)]) -> Option<Self> {
        let amounts: Vec<Decimal> = members.iter().map(|(a, _)| *a).collect();
        let max = amounts.iter().copied().max()?;
        Some(Self {
            max,
            avg: mean(&amounts)?,
            stddev: population_stddev(&amounts),
            total: amounts.iter().sum(),
            clusters: cluster_match(members, max),
        })
    }
}

// ── Snapshot computation ─────────────────────────────────────────────────────

type Members = Vec<(Decimal, Option<ClusterLabel>)>;

/// Compute both snapshots. Rows come out sorted by grouping key.
pub fn compute(rows: &[LabeledAmount]) -> AggregateSnapshot {
    let mut by_merchant: BTreeMap<(&str, Option<&str>), Members> = BTreeMap::new();
    let mut by_account: BTreeMap<&str, Members> = BTreeMap::new();
    for row in rows {
        by_merchant
            .entry((row.merchant_id.as_str(), row.subsidiary.as_deref()))
            .or_default()
            .push((row.amount, row.label));
        by_account
            .entry(row.account_number.as_str())
            .or_default()
            .push((row.amount, row.label));
    }

    let merchants = by_merchant
        .into_iter()
        .filter_map(|((merchant_id, subsidiary), members)| {
            let amounts: Vec<Decimal> = members.iter().map(|(a, _)| *a).collect();
            let p90 = percentile_90(&amounts)?;
            let stats = GroupStats::compute(&members)?;
            Some(MerchantAggregate {
                merchant_id: merchant_id.to_string(),
                subsidiary: subsidiary.map(str::to_string),
                max_transaction_amount: stats.max,
                percentile_90: p90,
                avg_amount: stats.avg,
                stddev_amount: stats.stddev,
                total_transactions_amount: stats.total,
                fractioned_transaction_counts: stats.clusters.clusters,
                matching_fractioned_max_amts: stats.clusters.matching,
                fractioned_max_amt_match_ratio: stats.clusters.ratio,
            })
        })
        .collect();

    let accounts = by_account
        .into_iter()
        .filter_map(|(account_number, members)| {
            let stats = GroupStats::compute(&members)?;
            Some(AccountAggregate {
                account_number: account_number.to_string(),
                max_transaction_amount: stats.max,
                avg_amount: stats.avg,
                stddev_amount: stats.stddev,
                total_transactions_amount: stats.total,
                fractioned_transaction_counts: stats.clusters.clusters,
                matching_fractioned_max_amts: stats.clusters.matching,
                fractioned_max_amt_match_ratio: stats.clusters.ratio,
            })
        })
        .collect();

    AggregateSnapshot {
        merchants,
        accounts,
    }
}

/// Recompute from the store and replace the sink's snapshot.
///
/// Any failure is wrapped in `EtlError::Aggregation`; callers reach this
/// only after a committed load (or an explicit refresh).
pub fn refresh(store: &EtlStore, sink: &mut dyn AggregateSink) -> EtlResult<AggregateSnapshot> {
    let snapshot = recompute_into(store, sink).map_err(|e| EtlError::Aggregation(Box::new(e)))?;
    log::info!(
        "aggregates refreshed: {} merchant groups, {} account groups -> {}",
        snapshot.merchants.len(),
        snapshot.accounts.len(),
        sink.name()
    );
    Ok(snapshot)
}

fn recompute_into(store: &EtlStore, sink: &mut dyn AggregateSink) -> EtlResult<AggregateSnapshot> {
    let rows = store.labeled_amounts()?;
    let snapshot = compute(&rows);
    sink.write(&snapshot)?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn decs(xs: &[&str]) -> Vec<Decimal> {
        xs.iter().map(|s| dec(s)).collect()
    }

    fn row(merchant: &str, sub: Option<&str>, acct: &str, amt: &str, label: Option<u64>) -> LabeledAmount {
        LabeledAmount {
            merchant_id: merchant.into(),
            subsidiary: sub.map(Into::into),
            account_number: acct.into(),
            amount: dec(amt),
            label,
        }
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        // n = 10 → rank floor(0.9 × 9) + 1 = 9 → 9th smallest.
        let amounts = decs(&["10", "1", "9", "2", "8", "3", "7", "4", "6", "5"]);
        assert_eq!(percentile_90(&amounts), Some(dec("9")));
        // n = 11 → rank floor(0.9 × 10) + 1 = 10.
        let amounts: Vec<Decimal> = (1..=11).map(Decimal::from).collect();
        assert_eq!(percentile_90(&amounts), Some(Decimal::from(10)));
        // n = 1 → the only value.
        assert_eq!(percentile_90(&decs(&["4.2"])), Some(dec("4.2")));
        // n = 2 → rank floor(0.9) + 1 = 1 → the minimum.
        assert_eq!(percentile_90(&decs(&["7", "3"])), Some(dec("3")));
        assert_eq!(percentile_90(&[]), None);
    }

    #[test]
    fn stddev_is_population_not_sample() {
        let amounts = decs(&["2", "4", "4", "4", "5", "5", "7", "9"]);
        let sd = population_stddev(&amounts).unwrap();
        assert!((sd - 2.0).abs() < 1e-12, "got {sd}");
        assert_eq!(population_stddev(&decs(&["3.5"])), Some(0.0));
        assert_eq!(population_stddev(&[]), None);
    }

    #[test]
    fn stddev_stable_for_large_amounts() {
        let amounts = decs(&["1000000000.01", "1000000000.03"]);
        let sd = population_stddev(&amounts).unwrap();
        assert!((sd - 0.01).abs() < 1e-6, "got {sd}");
    }

    #[test]
    fn mean_is_exact_decimal() {
        assert_eq!(mean(&decs(&["10.00", "20.00", "6.00"])), Some(dec("12")));
        assert_eq!(mean(&decs(&["1", "2"])), Some(dec("1.5")));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn cluster_match_counts_clusters_reaching_group_max() {
        let members = vec![
            (dec("50"), Some(1)),
            (dec("10"), Some(1)),
            (dec("50"), Some(2)),
            (dec("20"), Some(3)),
            (dec("50"), None),
        ];
        let m = cluster_match(&members, dec("50"));
        assert_eq!(m.clusters, 3);
        assert_eq!(m.matching, 2);
        assert!((m.ratio.unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn ratio_undefined_without_clusters() {
        let members = vec![(dec("50"), None), (dec("10"), None)];
        let m = cluster_match(&members, dec("50"));
        assert_eq!(m.clusters, 0);
        assert_eq!(m.matching, 0);
        assert_eq!(m.ratio, None);
    }

    #[test]
    fn snapshots_group_by_merchant_subsidiary_and_account() {
        let rows = vec![
            row("m1", Some("s1"), "a1", "10.00", Some(1)),
            row("m1", Some("s1"), "a1", "20.00", Some(1)),
            row("m1", Some("s1"), "a2", "5.00", Some(1)),
            row("m1", Some("s2"), "a3", "7.00", None),
            row("m1", None, "a3", "3.00", None),
            row("m2", None, "a2", "40.00", Some(2)),
            row("m2", None, "a2", "1.00", Some(2)),
        ];
        let snap = compute(&rows);

        assert_eq!(snap.merchants.len(), 4);
        // Sorted by key; None sorts before Some.
        assert_eq!(snap.merchants[0].subsidiary, None);
        assert_eq!(snap.merchants[0].merchant_id, "m1");

        let m1s1 = snap
            .merchants
            .iter()
            .find(|m| m.merchant_id == "m1" && m.subsidiary.as_deref() == Some("s1"))
            .unwrap();
        assert_eq!(m1s1.max_transaction_amount, dec("20.00"));
        assert_eq!(m1s1.total_transactions_amount, dec("35.00"));
        // n = 3 → rank floor(1.8) + 1 = 2 → second smallest.
        assert_eq!(m1s1.percentile_90, dec("10.00"));
        assert_eq!(m1s1.fractioned_transaction_counts, 1);
        assert_eq!(m1s1.matching_fractioned_max_amts, 1);
        assert_eq!(m1s1.fractioned_max_amt_match_ratio, Some(1.0));

        let m1s2 = snap
            .merchants
            .iter()
            .find(|m| m.subsidiary.as_deref() == Some("s2"))
            .unwrap();
        assert_eq!(m1s2.fractioned_transaction_counts, 0);
        assert_eq!(m1s2.fractioned_max_amt_match_ratio, None);
        assert_eq!(m1s2.stddev_amount, Some(0.0));

        assert_eq!(snap.accounts.len(), 3);
        let a2 = snap.accounts.iter().find(|a| a.account_number == "a2").unwrap();
        // a2 holds 5.00 (label 1), 40.00 and 1.00 (label 2); group max 40.00.
        assert_eq!(a2.max_transaction_amount, dec("40.00"));
        assert_eq!(a2.fractioned_transaction_counts, 2);
        assert_eq!(a2.matching_fractioned_max_amts, 1);
        assert_eq!(a2.fractioned_max_amt_match_ratio, Some(0.5));
    }

    #[test]
    fn ratios_always_within_unit_interval() {
        let rows: Vec<LabeledAmount> = (0..60)
            .map(|i| {
                let label = if i % 3 == 0 { None } else { Some((i % 7) as u64 + 1) };
                row(
                    &format!("m{}", i % 4),
                    if i % 5 == 0 { None } else { Some("s") },
                    &format!("a{}", i % 6),
                    &format!("{}.{:02}", (i * 37) % 500, i % 100),
                    label,
                )
            })
            .collect();
        let snap = compute(&rows);
        for m in &snap.merchants {
            match m.fractioned_max_amt_match_ratio {
                Some(r) => {
                    assert!(m.fractioned_transaction_counts > 0);
                    assert!((0.0..=1.0).contains(&r), "ratio {r} out of range");
                }
                None => assert_eq!(m.fractioned_transaction_counts, 0),
            }
        }
        for a in &snap.accounts {
            if let Some(r) = a.fractioned_max_amt_match_ratio {
                assert!((0.0..=1.0).contains(&r), "ratio {r} out of range");
            }
        }
    }

    #[test]
    fn empty_history_gives_empty_snapshot() {
        assert_eq!(compute(&[]), AggregateSnapshot::default());
    }
}
