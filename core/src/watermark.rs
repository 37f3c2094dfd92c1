//! Watermark tracking: which day to extract next.
//!
//! The watermark is derived from persisted rows only. The day after the
//! latest persisted transaction is next. Extraction stops once the latest
//! persisted day is today or later, so a pass run on day N can load day N
//! when day N - 1 is the latest on record.

use crate::error::{EtlError, EtlResult};
use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open extraction range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> EtlResult<Self> {
        if end <= start {
            return Err(EtlError::extraction(format!(
                "malformed range: end {end} is not after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single_day(start: NaiveDate) -> Self {
        Self {
            start,
            end: start + Days::new(1),
        }
    }

    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        let day = ts.date();
        self.start <= day && day < self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// Extract this window next.
    Window(DateWindow),
    /// `today` is not strictly after the last persisted day.
    UpToDate { latest: NaiveDate, today: NaiveDate },
}

/// Next extraction window.
///
/// - `latest`: most recent persisted `transaction_date`, if any.
/// - `bootstrap`: first day to extract when nothing is persisted yet.
pub fn next_window(
    latest: Option<NaiveDateTime>,
    today: NaiveDate,
    bootstrap: Option<NaiveDate>,
) -> EtlResult<Watermark> {
    match (latest, bootstrap) {
        (Some(latest), _) => {
            let last_day = latest.date();
            if today > last_day {
                Ok(Watermark::Window(DateWindow::single_day(last_day + Days::new(1))))
            } else {
                Ok(Watermark::UpToDate {
                    latest: last_day,
                    today,
                })
            }
        }
        (None, Some(first_day)) => {
            if today > first_day {
                Ok(Watermark::Window(DateWindow::single_day(first_day)))
            } else {
                Ok(Watermark::UpToDate {
                    latest: first_day,
                    today,
                })
            }
        }
        (None, None) => Err(EtlError::WatermarkUndefined),
    }
}
