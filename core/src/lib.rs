//! Incremental ETL for fractioned-transaction detection.
//!
//! PIPELINE ORDER (fixed):
//!   1. Watermark  — next unprocessed day from persisted history
//!   2. Source     — read that day's raw rows
//!   3. Labeler    — cluster same user/subsidiary/day rows, issue labels
//!   4. Loader     — atomic append of both row kinds; labels are issued
//!                   inside the same write transaction
//!   5. Aggregator — full recompute of merchant and account snapshots

pub mod aggregate;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod labeler;
pub mod loader;
pub mod model;
pub mod pipeline;
pub mod rng;
pub mod sink;
pub mod source;
pub mod store;
pub mod synth;
pub mod types;
pub mod watermark;
