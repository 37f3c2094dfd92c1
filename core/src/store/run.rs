use super::EtlStore;
use crate::{
    error::EtlResult,
    event::EventLogEntry,
    model::format_date,
    watermark::DateWindow,
};
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    /// Load committed but aggregation failed.
    Degraded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EtlRunRow {
    pub run_id: String,
    pub window_start: String,
    pub window_end: String,
    pub status: String,
    pub rows_extracted: i64,
    pub fractioned_rows: i64,
    pub clusters_labeled: i64,
    pub error: Option<String>,
}

impl EtlStore {
    // ── Run audit ─────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, window: &DateWindow, started_at: &str) -> EtlResult<()> {
        self.conn.execute(
            "INSERT INTO etl_run (run_id, window_start, window_end, started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                format_date(&window.start),
                format_date(&window.end),
                started_at,
                RunStatus::Running.as_str(),
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        finished_at: &str,
        rows_extracted: usize,
        fractioned_rows: usize,
        clusters_labeled: u64,
        error: Option<&str>,
    ) -> EtlResult<()> {
        self.conn.execute(
            "UPDATE etl_run SET status = ?1, finished_at = ?2, rows_extracted = ?3,
                    fractioned_rows = ?4, clusters_labeled = ?5, error = ?6
             WHERE run_id = ?7",
            params![
                status.as_str(),
                finished_at,
                rows_extracted as i64,
                fractioned_rows as i64,
                clusters_labeled as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn run(&self, run_id: &str) -> EtlResult<Option<EtlRunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, window_start, window_end, status, rows_extracted,
                    fractioned_rows, clusters_labeled, error
             FROM etl_run WHERE run_id = ?1",
        )?;
        let row = stmt.query_row(params![run_id], map_run).optional()?;
        Ok(row)
    }

    /// Most recently started run.
    pub fn latest_run(&self) -> EtlResult<Option<EtlRunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, window_start, window_end, status, rows_extracted,
                    fractioned_rows, clusters_labeled, error
             FROM etl_run ORDER BY started_at DESC, rowid DESC LIMIT 1",
        )?;
        let row = stmt.query_row([], map_run).optional()?;
        Ok(row)
    }

    pub fn run_count(&self) -> EtlResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM etl_run", [], |row| row.get(0))?;
        Ok(n)
    }

    // ── Event log ─────────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> EtlResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, stage, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.run_id, entry.stage, entry.event_type, entry.payload],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> EtlResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    stage: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn map_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<EtlRunRow> {
    Ok(EtlRunRow {
        run_id: row.get(0)?,
        window_start: row.get(1)?,
        window_end: row.get(2)?,
        status: row.get(3)?,
        rows_extracted: row.get(4)?,
        fractioned_rows: row.get(5)?,
        clusters_labeled: row.get(6)?,
        error: row.get(7)?,
    })
}
