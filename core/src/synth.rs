//! Synthetic landing data with deliberate structuring bursts.
//!
//! Each day draws from its own RNG stream keyed by the day number, so a
//! given (seed, day) always yields the same rows.

use crate::{
    config::SynthConfig,
    error::EtlResult,
    model::Transaction,
    rng::SeededRng,
    source::LandingTableSource,
};
use chrono::{Days, NaiveDate, NaiveTime};
use rust_decimal::Decimal;

const TRANSACTION_TYPES: [&str; 3] = ["purchase", "transfer", "cash_withdrawal"];
const SECONDS_PER_DAY: u64 = 86_400;
/// Structuring bursts break up an amount this many times a normal draw.
const BURST_MULTIPLIER: i64 = 20;

fn stream_for(day: NaiveDate) -> u64 {
    day.signed_duration_since(NaiveDate::MIN).num_days() as u64
}

/// Split `whole` cents into `parts` amounts that sum to it exactly. The
/// remainder lands on the first part.
fn split_cents(whole: i64, parts: i64) -> Vec<Decimal> {
    let share = whole / parts;
    let rest = whole - share * parts;
    (0..parts)
        .map(|i| Decimal::new(if i == 0 { share + rest } else { share }, 2))
        .collect()
}

/// Every fifth user has no subsidiary; the rest belong to one of three.
fn subsidiary_of(user: u64) -> Option<String> {
    if user % 5 == 0 {
        None
    } else {
        Some(format!("sub-{}", user % 3))
    }
}

/// One day of transactions.
pub fn generate_day(cfg: &SynthConfig, day: NaiveDate) -> Vec<Transaction> {
    let mut rng = SeededRng::new(cfg.seed, stream_for(day));
    let mut rows = Vec::with_capacity(cfg.txns_per_day as usize);
    let users = u64::from(cfg.users.max(1));
    let merchants = u64::from(cfg.merchants.max(1));
    let max_parts = u64::from(cfg.max_split_parts.max(2));

    let emit = |rng: &mut SeededRng, user: u64, amount: Decimal, rows: &mut Vec<Transaction>| {
        let at = NaiveTime::MIN + chrono::Duration::seconds(rng.pick(SECONDS_PER_DAY) as i64);
        let kind = TRANSACTION_TYPES[rng.pick(TRANSACTION_TYPES.len() as u64) as usize];
        rows.push(Transaction {
            id: format!("{}-{:016x}", day.format("%Y%m%d"), rng.token()),
            merchant_id: format!("merchant-{}", rng.pick(merchants)),
            subsidiary: subsidiary_of(user),
            transaction_date: day.and_time(at),
            account_number: format!("acct-{user:04}"),
            user_id: format!("user-{user:04}"),
            transaction_amount: amount,
            transaction_type: kind.to_string(),
        });
    };

    while rows.len() < cfg.txns_per_day as usize {
        let user = rng.pick(users);
        let cents = rng.amount_cents(cfg.amount_xmin, cfg.amount_alpha);
        if rng.chance(cfg.split_probability) {
            // Structuring burst: one larger amount broken into same-day parts.
            let parts = 2 + rng.pick(max_parts - 1) as i64;
            for part in split_cents(cents * BURST_MULTIPLIER, parts) {
                emit(&mut rng, user, part, &mut rows);
            }
        } else {
            emit(&mut rng, user, Decimal::new(cents, 2), &mut rows);
        }
    }

    rows
}

/// Generate `days` consecutive days starting at `first_day` and stage them.
pub fn seed_landing_table(
    source: &mut LandingTableSource,
    cfg: &SynthConfig,
    first_day: NaiveDate,
    days: u64,
) -> EtlResult<usize> {
    source.ensure_schema()?;
    let mut staged = 0;
    for offset in 0..days {
        let day = first_day + Days::new(offset);
        staged += source.stage(&generate_day(cfg, day))?;
    }
    log::info!("staged {staged} synthetic transactions over {days} days from {first_day}");
    Ok(staged)
}
