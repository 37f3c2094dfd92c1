//! Process configuration.
//!
//! Loaded from a JSON file; the runner's CLI flags override individual
//! fields. In tests, use EtlConfig::default_test().

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlConfig {
    /// SQLite file holding transactions, labels and the audit trail.
    pub store_path: String,
    /// SQLite file holding the `source_transaction` landing table.
    pub source_path: String,
    /// Directory receiving the aggregate snapshot files.
    pub aggregate_dir: String,
    /// First day to extract when the store is empty. Without it an empty
    /// store is a WatermarkUndefined error.
    #[serde(default)]
    pub bootstrap_date: Option<NaiveDate>,
    #[serde(default)]
    pub synth: SynthConfig,
}

/// Shape of generated landing data (`--synthesize-days`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthConfig {
    pub seed: u64,
    pub users: u32,
    pub merchants: u32,
    pub txns_per_day: u32,
    /// Probability that a generated transaction is split into a same-day burst.
    pub split_probability: f64,
    pub max_split_parts: u32,
    pub amount_xmin: f64,
    pub amount_alpha: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            users: 40,
            merchants: 6,
            txns_per_day: 120,
            split_probability: 0.08,
            max_split_parts: 4,
            amount_xmin: 10.0,
            amount_alpha: 1.4,
        }
    }
}

impl EtlConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EtlConfig = serde_json::from_str(&content)?;
        if config.synth.max_split_parts < 2 {
            anyhow::bail!("synth.max_split_parts must be at least 2");
        }
        Ok(config)
    }

    /// In-memory store, in-memory source, no bootstrap date.
    pub fn default_test() -> Self {
        Self {
            store_path: ":memory:".into(),
            source_path: ":memory:".into(),
            aggregate_dir: "./aggregates".into(),
            bootstrap_date: None,
            synth: SynthConfig::default(),
        }
    }
}
