//! etl-runner: one-shot trigger for the fractioned-transaction ETL.
//!
//! Usage:
//!   etl-runner --config etl.json
//!   etl-runner --db etl.db --source landing.db --out ./aggregates --bootstrap 2021-01-01
//!   etl-runner --config etl.json --backfill 2021-01-01 2021-01-05
//!   etl-runner --config etl.json --refresh
//!   etl-runner --source landing.db --synthesize-days 5 --from 2021-01-01
//!
//! Prints one JSON line: {"state":"success",...} or {"error":"..."}.
//! Exit status is non-zero on failure.

use anyhow::Result;
use chrono::NaiveDate;
use fracwatch_core::{
    clock::FixedClock,
    config::EtlConfig,
    pipeline::{EtlPipeline, PassOutcome, PassReport},
    source::LandingTableSource,
    synth,
};
use serde_json::json;
use std::env;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    match run(&args) {
        Ok(body) => println!("{body}"),
        Err(e) => {
            log::error!("{e:#}");
            println!("{}", json!({ "error": format!("{e:#}") }));
            std::process::exit(1);
        }
    }
}

fn run(args: &[String]) -> Result<serde_json::Value> {
    let mut cfg = match flag_value(args, "--config") {
        Some(path) => EtlConfig::load(path)?,
        None => EtlConfig {
            store_path: "etl.db".into(),
            source_path: "landing.db".into(),
            aggregate_dir: "./aggregates".into(),
            ..EtlConfig::default_test()
        },
    };
    if let Some(v) = flag_value(args, "--db") {
        cfg.store_path = v.to_string();
    }
    if let Some(v) = flag_value(args, "--source") {
        cfg.source_path = v.to_string();
    }
    if let Some(v) = flag_value(args, "--out") {
        cfg.aggregate_dir = v.to_string();
    }
    if let Some(v) = flag_value(args, "--bootstrap") {
        cfg.bootstrap_date = Some(parse_date(v)?);
    }
    if let Some(v) = flag_value(args, "--seed") {
        cfg.synth.seed = v.parse()?;
    }

    if let Some(days) = flag_value(args, "--synthesize-days") {
        let days: u64 = days.parse()?;
        let from = match flag_value(args, "--from") {
            Some(v) => parse_date(v)?,
            None => cfg
                .bootstrap_date
                .ok_or_else(|| anyhow::anyhow!("--synthesize-days needs --from or a bootstrap date"))?,
        };
        let mut landing = LandingTableSource::open(&cfg.source_path)?;
        let staged = synth::seed_landing_table(&mut landing, &cfg.synth, from, days)?;
        return Ok(json!({ "state": "success", "staged": staged, "source": cfg.source_path }));
    }

    log::info!(
        "store={} source={} out={} bootstrap={:?}",
        cfg.store_path,
        cfg.source_path,
        cfg.aggregate_dir,
        cfg.bootstrap_date
    );
    let mut pipeline = EtlPipeline::from_config(&cfg)?;
    if let Some(v) = flag_value(args, "--today") {
        pipeline.set_clock(Box::new(FixedClock::new(parse_date(v)?)));
    }

    if args.iter().any(|a| a == "--refresh") {
        let snapshot = pipeline.refresh_aggregates()?;
        return Ok(json!({
            "state": "success",
            "merchant_groups": snapshot.merchants.len(),
            "account_groups": snapshot.accounts.len(),
        }));
    }

    if let Some(pos) = args.iter().position(|a| a == "--backfill") {
        let start = args
            .get(pos + 1)
            .ok_or_else(|| anyhow::anyhow!("--backfill needs START END"))?;
        let end = args
            .get(pos + 2)
            .ok_or_else(|| anyhow::anyhow!("--backfill needs START END"))?;
        let report = pipeline.backfill(parse_date(start)?, parse_date(end)?)?;
        return Ok(report_json(&report));
    }

    Ok(match pipeline.run_once()? {
        PassOutcome::NothingToDo { latest, today } => json!({
            "state": "success",
            "nothing_to_do": true,
            "latest": latest.to_string(),
            "today": today.to_string(),
        }),
        PassOutcome::Completed(report) => report_json(&report),
    })
}

fn report_json(report: &PassReport) -> serde_json::Value {
    json!({
        "state": "success",
        "run_id": report.run_id,
        "window_start": report.window.start.to_string(),
        "window_end": report.window.end.to_string(),
        "rows_extracted": report.rows_extracted,
        "fractioned_rows": report.fractioned_rows,
        "clusters_labeled": report.clusters_labeled,
        "last_label": report.last_label,
        "merchant_groups": report.merchant_groups,
        "account_groups": report.account_groups,
    })
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date '{raw}' (want YYYY-MM-DD): {e}"))
}
