//! Pipeline events — the audit trail of every non-trivial pass.
//!
//! Each event is serialized to JSON and appended to `event_log` under the
//! pass's run id. Variants are only ever added, never reordered.

use crate::types::{ClusterLabel, RunId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    PassStarted {
        run_id: RunId,
        window_start: NaiveDate,
        window_end: NaiveDate,
    },
    BatchExtracted {
        rows: usize,
    },
    ClustersLabeled {
        clusters: u64,
        fractioned_rows: usize,
        first_label: Option<ClusterLabel>,
        last_label: ClusterLabel,
    },
    BatchLoaded {
        transactions: usize,
        fractioned: usize,
    },
    AggregatesRefreshed {
        merchant_groups: usize,
        account_groups: usize,
        sink: String,
    },
    PassFailed {
        stage: String,
        error: String,
    },
}

impl PipelineEvent {
    /// Stage that emits this event. Used for the `stage` column.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::PassStarted { .. } => "watermark",
            Self::BatchExtracted { .. } => "source",
            Self::ClustersLabeled { .. } => "labeler",
            Self::BatchLoaded { .. } => "loader",
            Self::AggregatesRefreshed { .. } => "aggregator",
            Self::PassFailed { .. } => "pipeline",
        }
    }

    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::PassStarted { .. } => "pass_started",
            Self::BatchExtracted { .. } => "batch_extracted",
            Self::ClustersLabeled { .. } => "clusters_labeled",
            Self::BatchLoaded { .. } => "batch_loaded",
            Self::AggregatesRefreshed { .. } => "aggregates_refreshed",
            Self::PassFailed { .. } => "pass_failed",
        }
    }
}

/// A persisted event log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub stage: String,
    pub event_type: String,
    pub payload: String,
}

impl EventLogEntry {
    pub fn from_event(run_id: &str, event: &PipelineEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            run_id: run_id.to_string(),
            stage: event.stage().to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
        })
    }
}
