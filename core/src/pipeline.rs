//! Pipeline orchestrator — one complete pass per trigger.
//!
//! PASS ORDER (fixed, never reordered):
//!   1. Watermark  — up to date? return NothingToDo with zero reads/writes
//!   2. Source     — read the window
//!   3. Loader     — label (counter continues from the store's max label)
//!                   and commit in one `BEGIN IMMEDIATE` transaction
//!   4. Aggregator — full snapshot refresh
//!
//! RULES:
//!   - One pass at a time per pipeline: every pass takes `&mut self`.
//!     Passes from other connections are serialized by the load
//!     transaction, which reads the label counter under the write lock. A
//!     pass that re-extracts a day another pass already committed fails on
//!     the primary key and loads nothing.
//!   - A failed stage aborts the pass. Nothing is retried.
//!   - Audit rows (etl_run, event_log) are written outside the load
//!     transaction and never block the outcome they describe.

use crate::{
    aggregate::{self, AggregateSnapshot},
    clock::{Clock, SystemClock},
    config::EtlConfig,
    error::{EtlError, EtlResult},
    event::{EventLogEntry, PipelineEvent},
    loader,
    sink::{AggregateSink, JsonDirSink},
    source::{LandingTableSource, SourceReader},
    store::{EtlStore, RunStatus},
    types::{ClusterLabel, RunId},
    watermark::{self, DateWindow, Watermark},
};
use chrono::NaiveDate;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The latest persisted day is today (or later); nothing was read.
    NothingToDo { latest: NaiveDate, today: NaiveDate },
    Completed(PassReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub run_id: RunId,
    pub window: DateWindow,
    pub rows_extracted: usize,
    pub fractioned_rows: usize,
    pub clusters_labeled: u64,
    /// First label issued by this pass, None if no cluster was found.
    pub first_label: Option<ClusterLabel>,
    pub last_label: ClusterLabel,
    pub merchant_groups: usize,
    pub account_groups: usize,
}

pub struct EtlPipeline {
    pub store: EtlStore,
    source: Box<dyn SourceReader>,
    sink: Box<dyn AggregateSink>,
    clock: Box<dyn Clock>,
    bootstrap_date: Option<NaiveDate>,
}

impl EtlPipeline {
    pub fn new(
        store: EtlStore,
        source: Box<dyn SourceReader>,
        sink: Box<dyn AggregateSink>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            sink,
            clock,
            bootstrap_date: None,
        }
    }

    /// Wire a pipeline from configuration: file store (migrated), landing
    /// table source, JSON snapshot directory, system clock.
    pub fn from_config(cfg: &EtlConfig) -> EtlResult<Self> {
        let store = EtlStore::open(&cfg.store_path)?;
        store.migrate()?;
        let source = LandingTableSource::open(&cfg.source_path)?;
        Ok(Self::new(
            store,
            Box::new(source),
            Box::new(JsonDirSink::new(&cfg.aggregate_dir)),
            Box::new(SystemClock),
        )
        .with_bootstrap_date(cfg.bootstrap_date))
    }

    pub fn with_bootstrap_date(mut self, bootstrap_date: Option<NaiveDate>) -> Self {
        self.bootstrap_date = bootstrap_date;
        self
    }

    pub fn source(&self) -> &dyn SourceReader {
        self.source.as_ref()
    }

    pub fn sink(&self) -> &dyn AggregateSink {
        self.sink.as_ref()
    }

    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = clock;
    }

    /// Where the next pass would read, without reading.
    pub fn next_window(&self) -> EtlResult<Watermark> {
        let latest = self.store.latest_transaction_date()?;
        watermark::next_window(latest, self.clock.today(), self.bootstrap_date)
    }

    /// One trigger: watermark, then extract/label/load/aggregate.
    pub fn run_once(&mut self) -> EtlResult<PassOutcome> {
        match self.next_window()? {
            Watermark::UpToDate { latest, today } => {
                log::info!("nothing to do: latest persisted day {latest}, today {today}");
                Ok(PassOutcome::NothingToDo { latest, today })
            }
            Watermark::Window(window) => self.run_window(window).map(PassOutcome::Completed),
        }
    }

    /// Extract an explicit range. Used for the initial load and to step
    /// over days the source never delivered.
    pub fn backfill(&mut self, start: NaiveDate, end: NaiveDate) -> EtlResult<PassReport> {
        let window = DateWindow::new(start, end)?;
        self.run_window(window)
    }

    /// Recompute snapshots without extracting. Recovery path after an
    /// aggregation failure.
    pub fn refresh_aggregates(&mut self) -> EtlResult<AggregateSnapshot> {
        aggregate::refresh(&self.store, self.sink.as_mut())
    }

    fn run_window(&mut self, window: DateWindow) -> EtlResult<PassReport> {
        let run_id = Uuid::new_v4().to_string();
        self.store.insert_run(&run_id, &window, &now())?;
        self.record(
            &run_id,
            &PipelineEvent::PassStarted {
                run_id: run_id.clone(),
                window_start: window.start,
                window_end: window.end,
            },
        );
        log::info!("pass {run_id}: extracting {window} from {}", self.source.name());

        let rows = match self.source.read(window.start, window.end) {
            Ok(rows) => rows,
            Err(e) => return Err(self.fail(&run_id, "source", RunStatus::Failed, (0, 0, 0), e)),
        };
        let rows_extracted = rows.len();
        self.record(&run_id, &PipelineEvent::BatchExtracted { rows: rows_extracted });
        if rows.is_empty() {
            log::warn!(
                "pass {run_id}: window {window} is empty; the watermark will not advance past it"
            );
        }

        let committed = match loader::commit(&mut self.store, rows) {
            Ok(committed) => committed,
            Err(e) => {
                return Err(self.fail(&run_id, "loader", RunStatus::Failed, (rows_extracted, 0, 0), e))
            }
        };
        let clusters = committed.clusters();
        let fractioned_rows = committed.counts.fractioned;
        let first_label = committed.first_label();
        let last_label = committed.batch.last_label;
        self.record(
            &run_id,
            &PipelineEvent::ClustersLabeled {
                clusters,
                fractioned_rows,
                first_label,
                last_label,
            },
        );
        self.record(
            &run_id,
            &PipelineEvent::BatchLoaded {
                transactions: committed.counts.transactions,
                fractioned: fractioned_rows,
            },
        );

        let tally = (rows_extracted, fractioned_rows, clusters);
        let snapshot = match aggregate::refresh(&self.store, self.sink.as_mut()) {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.fail(&run_id, "aggregator", RunStatus::Degraded, tally, e)),
        };
        self.record(
            &run_id,
            &PipelineEvent::AggregatesRefreshed {
                merchant_groups: snapshot.merchants.len(),
                account_groups: snapshot.accounts.len(),
                sink: self.sink.name().to_string(),
            },
        );
        self.store.finish_run(
            &run_id,
            RunStatus::Succeeded,
            &now(),
            rows_extracted,
            fractioned_rows,
            clusters,
            None,
        )?;

        log::info!("pass {run_id}: {rows_extracted} rows, {clusters} clusters, last label {last_label}");

        Ok(PassReport {
            run_id,
            window,
            rows_extracted,
            fractioned_rows,
            clusters_labeled: clusters,
            first_label,
            last_label,
            merchant_groups: snapshot.merchants.len(),
            account_groups: snapshot.accounts.len(),
        })
    }

    /// Append an audit event. Audit failures are logged, never raised.
    fn record(&self, run_id: &str, event: &PipelineEvent) {
        let written = EventLogEntry::from_event(run_id, event)
            .map_err(EtlError::from)
            .and_then(|entry| self.store.append_event(&entry));
        if let Err(e) = written {
            log::warn!("pass {run_id}: could not record {}: {e}", event.type_name());
        }
    }

    /// Close the run with `status` and hand the error back for propagation.
    fn fail(
        &self,
        run_id: &str,
        stage: &str,
        status: RunStatus,
        (rows, fractioned, clusters): (usize, usize, u64),
        err: EtlError,
    ) -> EtlError {
        log::error!("pass {run_id}: {stage} failed: {err}");
        let message = err.to_string();
        self.record(
            run_id,
            &PipelineEvent::PassFailed {
                stage: stage.to_string(),
                error: message.clone(),
            },
        );
        if let Err(e) =
            self.store
                .finish_run(run_id, status, &now(), rows, fractioned, clusters, Some(&message))
        {
            log::warn!("pass {run_id}: could not close run: {e}");
        }
        err
    }
}

fn now() -> String {
    crate::model::format_timestamp(&chrono::Utc::now().naive_utc())
}
