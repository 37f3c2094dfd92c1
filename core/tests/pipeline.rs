//! Integration tests: incremental passes over an in-memory store.
//!
//! 1. The three-way split example produces one shared label
//! 2. Labels keep increasing across passes
//! 3. An up-to-date store performs no reads or writes
//! 4. Empty store: bootstrap date or WatermarkUndefined
//! 5. Extraction failures leave nothing behind
//! 6. Every pass leaves an audit trail

use chrono::{NaiveDate, NaiveDateTime};
use fracwatch_core::{
    clock::FixedClock,
    error::EtlError,
    model::Transaction,
    pipeline::{EtlPipeline, PassOutcome},
    sink::MemorySink,
    source::MemorySource,
    store::EtlStore,
    watermark::{DateWindow, Watermark},
};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, d).unwrap()
}

fn at(d: u32, h: u32) -> NaiveDateTime {
    day(d).and_hms_opt(h, 0, 0).unwrap()
}

fn txn(id: &str, user: &str, sub: Option<&str>, ts: NaiveDateTime, amt: &str) -> Transaction {
    Transaction {
        id: id.into(),
        merchant_id: "merchant-1".into(),
        subsidiary: sub.map(Into::into),
        transaction_date: ts,
        account_number: format!("acct-{user}"),
        user_id: user.into(),
        transaction_amount: Decimal::from_str(amt).unwrap(),
        transaction_type: "purchase".into(),
    }
}

fn build(rows: Vec<Transaction>, today: NaiveDate) -> EtlPipeline {
    let store = EtlStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    EtlPipeline::new(
        store,
        Box::new(MemorySource::new(rows)),
        Box::new(MemorySink::new()),
        Box::new(FixedClock::new(today)),
    )
}

fn source_reads(p: &EtlPipeline) -> usize {
    p.source()
        .as_any()
        .downcast_ref::<MemorySource>()
        .expect("memory source")
        .reads()
}

fn sink_writes(p: &EtlPipeline) -> usize {
    p.sink()
        .as_any()
        .downcast_ref::<MemorySink>()
        .expect("memory sink")
        .writes
}

/// Seed day 1 with one transaction so the watermark starts at day 2.
fn seed_history(p: &mut EtlPipeline) {
    p.store
        .load(&[txn("seed", "Z", None, at(1, 8), "1.00")], &[])
        .expect("seed load");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: the worked example
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn three_way_split_gets_one_shared_label() {
    let rows = vec![
        txn("u1", "U", Some("S"), at(2, 9), "10.00"),
        txn("u2", "U", Some("S"), at(2, 12), "20.00"),
        txn("u3", "U", Some("S"), at(2, 18), "5.00"),
        txn("v1", "V", Some("S"), at(2, 10), "7.00"),
    ];
    let mut p = build(rows, day(10));
    seed_history(&mut p);

    let report = match p.run_once().unwrap() {
        PassOutcome::Completed(r) => r,
        other => panic!("expected a completed pass, got {other:?}"),
    };
    assert_eq!(report.window, DateWindow::single_day(day(2)));
    assert_eq!(report.rows_extracted, 4);
    assert_eq!(report.clusters_labeled, 1);
    assert_eq!(report.first_label, Some(1));

    let label = p.store.fractioned_for("u1").unwrap().unwrap().transaction_label;
    for id in ["u1", "u2", "u3"] {
        let f = p.store.fractioned_for(id).unwrap().expect("fractioned row");
        assert_eq!(f.transaction_label, label);
        assert_eq!(f.transaction_counts, 3);
        assert_eq!(f.transaction_total_amount, Decimal::from_str("35.00").unwrap());
    }
    assert!(p.store.fractioned_for("v1").unwrap().is_none());
    assert_eq!(p.store.transaction_count().unwrap(), 5);

    // Amounts survive storage exactly.
    let stored = p.store.transaction("u2").unwrap().unwrap();
    assert_eq!(stored.transaction_amount, Decimal::from_str("20.00").unwrap());
    assert_eq!(stored.transaction_date, at(2, 12));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: labels are monotonic across passes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn labels_increase_across_passes() {
    let mut rows = Vec::new();
    for d in 2..=5 {
        for user in ["A", "B"] {
            rows.push(txn(&format!("{user}{d}-1"), user, None, at(d, 9), "3.00"));
            rows.push(txn(&format!("{user}{d}-2"), user, None, at(d, 15), "4.00"));
        }
    }
    let mut p = build(rows, day(5));
    seed_history(&mut p);

    let mut issued: Vec<u64> = Vec::new();
    for _ in 0..4 {
        let report = match p.run_once().unwrap() {
            PassOutcome::Completed(r) => r,
            other => panic!("expected a completed pass, got {other:?}"),
        };
        let prior_max = issued.iter().copied().max().unwrap_or(0);
        assert_eq!(report.first_label, Some(prior_max + 1));
        issued.extend(report.first_label.unwrap()..=report.last_label);
    }
    assert_eq!(issued, (1..=8).collect::<Vec<_>>());
    assert_eq!(p.store.max_label().unwrap(), 8);

    // Every label groups exactly transaction_counts rows with one total.
    let mut by_label: HashMap<u64, Vec<_>> = HashMap::new();
    for f in p.store.fractioned_rows().unwrap() {
        by_label.entry(f.transaction_label).or_default().push(f);
    }
    for rows in by_label.values() {
        assert_eq!(rows.len() as u32, rows[0].transaction_counts);
        let totals: BTreeSet<_> = rows.iter().map(|r| r.transaction_total_amount).collect();
        assert_eq!(totals.len(), 1);
    }

    // Day 5 persisted and today is day 5: caught up.
    assert!(matches!(p.run_once().unwrap(), PassOutcome::NothingToDo { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: no-op pass
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn up_to_date_store_performs_no_reads_or_writes() {
    let rows = vec![txn("late", "U", None, at(3, 9), "2.00")];
    let mut p = build(rows, day(1));
    seed_history(&mut p);
    let runs_before = p.store.run_count().unwrap();

    let outcome = p.run_once().unwrap();
    assert_eq!(
        outcome,
        PassOutcome::NothingToDo {
            latest: day(1),
            today: day(1)
        }
    );
    assert_eq!(source_reads(&p), 0);
    assert_eq!(sink_writes(&p), 0);
    assert_eq!(p.store.transaction_count().unwrap(), 1);
    assert_eq!(p.store.run_count().unwrap(), runs_before);
}

#[test]
fn next_day_unlocks_when_clock_moves() {
    let rows = vec![txn("d2", "U", None, at(2, 9), "2.00")];
    let mut p = build(rows, day(1));
    seed_history(&mut p);
    assert!(matches!(p.run_once().unwrap(), PassOutcome::NothingToDo { .. }));

    p.set_clock(Box::new(FixedClock::new(day(2))));
    match p.run_once().unwrap() {
        PassOutcome::Completed(r) => assert_eq!(r.rows_extracted, 1),
        other => panic!("expected a completed pass, got {other:?}"),
    }
    assert_eq!(source_reads(&p), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: empty store
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn empty_store_without_bootstrap_is_watermark_undefined() {
    let mut p = build(vec![txn("a", "U", None, at(1, 9), "1")], day(5));
    let err = p.run_once().unwrap_err();
    assert!(matches!(err, EtlError::WatermarkUndefined), "got {err}");
    assert_eq!(source_reads(&p), 0);
}

#[test]
fn empty_store_starts_at_bootstrap_date() {
    let rows = vec![
        txn("a", "U", None, at(1, 9), "1"),
        txn("b", "U", None, at(1, 10), "2"),
        txn("c", "U", None, at(2, 10), "2"),
    ];
    let mut p = build(rows, day(5)).with_bootstrap_date(Some(day(1)));

    assert_eq!(
        p.next_window().unwrap(),
        Watermark::Window(DateWindow::single_day(day(1)))
    );
    let report = match p.run_once().unwrap() {
        PassOutcome::Completed(r) => r,
        other => panic!("expected a completed pass, got {other:?}"),
    };
    assert_eq!(report.rows_extracted, 2);
    assert_eq!(report.last_label, 1);

    // Second pass follows persisted history, not the bootstrap date.
    assert_eq!(
        p.next_window().unwrap(),
        Watermark::Window(DateWindow::single_day(day(2)))
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: extraction failure
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn extraction_failure_mutates_nothing() {
    let store = EtlStore::in_memory().unwrap();
    store.migrate().unwrap();
    let mut p = EtlPipeline::new(
        store,
        Box::new(MemorySource::failing("landing file unreadable")),
        Box::new(MemorySink::new()),
        Box::new(FixedClock::new(day(9))),
    );
    seed_history(&mut p);

    let err = p.run_once().unwrap_err();
    assert!(matches!(err, EtlError::Extraction { .. }), "got {err}");
    assert_eq!(p.store.transaction_count().unwrap(), 1);
    assert_eq!(p.store.fractioned_count().unwrap(), 0);
    assert_eq!(sink_writes(&p), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: audit trail and aggregates
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn completed_pass_records_run_and_events() {
    let rows = vec![
        txn("u1", "U", Some("S"), at(2, 9), "10.00"),
        txn("u2", "U", Some("S"), at(2, 12), "20.00"),
    ];
    let mut p = build(rows, day(10));
    seed_history(&mut p);

    let report = match p.run_once().unwrap() {
        PassOutcome::Completed(r) => r,
        other => panic!("expected a completed pass, got {other:?}"),
    };

    let run = p.store.run(&report.run_id).unwrap().expect("run row");
    assert_eq!(run.status, "succeeded");
    assert_eq!(run.window_start, "2021-01-02");
    assert_eq!(run.window_end, "2021-01-03");
    assert_eq!(run.rows_extracted, 2);
    assert_eq!(run.clusters_labeled, 1);

    let kinds: Vec<String> = p
        .store
        .events_for_run(&report.run_id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            "pass_started",
            "batch_extracted",
            "clusters_labeled",
            "batch_loaded",
            "aggregates_refreshed"
        ]
    );

    let sink = p.sink().as_any().downcast_ref::<MemorySink>().unwrap();
    let snap = sink.latest.as_ref().expect("snapshot written");
    // Seed row (merchant-1, no subsidiary) plus merchant-1/S.
    assert_eq!(snap.merchants.len(), 2);
    assert_eq!(report.merchant_groups, 2);
    let s = snap
        .merchants
        .iter()
        .find(|m| m.subsidiary.as_deref() == Some("S"))
        .unwrap();
    assert_eq!(s.fractioned_transaction_counts, 1);
    assert_eq!(s.matching_fractioned_max_amts, 1);
    assert_eq!(s.fractioned_max_amt_match_ratio, Some(1.0));
    assert_eq!(s.stddev_amount, Some(5.0));
}

#[test]
fn empty_window_still_refreshes_aggregates() {
    let mut p = build(Vec::new(), day(10));
    seed_history(&mut p);

    let report = match p.run_once().unwrap() {
        PassOutcome::Completed(r) => r,
        other => panic!("expected a completed pass, got {other:?}"),
    };
    assert_eq!(report.rows_extracted, 0);
    assert_eq!(report.first_label, None);
    assert_eq!(sink_writes(&p), 1);

    // Nothing new persisted: the next pass targets the same day.
    assert_eq!(
        p.next_window().unwrap(),
        Watermark::Window(DateWindow::single_day(day(2)))
    );
}

#[test]
fn backfill_loads_a_range_and_rejects_inverted_ones() {
    let rows = vec![
        txn("a1", "A", None, at(1, 9), "1"),
        txn("a2", "A", None, at(1, 10), "1"),
        txn("b1", "B", None, at(3, 9), "1"),
        txn("b2", "B", None, at(3, 10), "1"),
        txn("c1", "C", None, at(5, 9), "1"),
    ];
    let mut p = build(rows, day(10));

    let report = p.backfill(day(1), day(5)).unwrap();
    assert_eq!(report.rows_extracted, 4);
    assert_eq!(report.clusters_labeled, 2);
    assert_eq!(
        p.next_window().unwrap(),
        Watermark::Window(DateWindow::single_day(day(4)))
    );

    let err = p.backfill(day(5), day(5)).unwrap_err();
    assert!(matches!(err, EtlError::Extraction { .. }), "got {err}");
}
