//! Windowed backfill: walk backward from today toward the watermark.
//!
//! Each iteration requests at most `window_span_days + 1` calendar days, newest
//! first, so the most recent gap is filled even when deep history cannot be.
//! The walk stops when:
//!
//! - the next window would start after it ends (**Exhausted**),
//! - the window just requested starts the day after the watermark
//!   (**BoundaryReached**), or
//! - `stall_threshold` consecutive windows came back empty (**Stalled**).
//!
//! Provider failures never abort a backfill; they count as empty windows.

use super::observer::IngestObserver;
use super::pacing::{Clock, FixedDelay, Pacer, SystemClock};
use crate::data::{normalize, CandleProvider};
use crate::domain::{Batch, FetchWindow, Ticker};
use crate::error::IngestError;
use crate::store::{Watermark, WatermarkStore};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Widest `to - from` a provider accepts in one request.
pub const MAX_WINDOW_SPAN_DAYS: u32 = 29;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Where history starts when the ticker has none.
    pub floor_date: NaiveDate,
    /// Watermarks dated before this year are treated as store defaults.
    pub sentinel_year: i32,
    /// `to - from` of every window, in days; at most [`MAX_WINDOW_SPAN_DAYS`].
    pub window_span_days: u32,
    /// Consecutive empty windows that end a backfill.
    pub stall_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            floor_date: NaiveDate::from_ymd_opt(2016, 1, 1).unwrap_or_default(),
            sentinel_year: 1980,
            window_span_days: MAX_WINDOW_SPAN_DAYS,
            stall_threshold: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.stall_threshold == 0 {
            return Err("stall_threshold must be at least 1".into());
        }
        if self.window_span_days > MAX_WINDOW_SPAN_DAYS {
            return Err(format!(
                "window_span_days {} exceeds the {MAX_WINDOW_SPAN_DAYS}-day provider limit",
                self.window_span_days
            ));
        }
        if self.floor_date.year() < self.sentinel_year {
            return Err(format!(
                "floor_date {} is older than sentinel_year {}",
                self.floor_date, self.sentinel_year
            ));
        }
        Ok(())
    }

    /// Configured span, never wider than [`MAX_WINDOW_SPAN_DAYS`].
    pub fn effective_span_days(&self) -> u32 {
        self.window_span_days.min(MAX_WINDOW_SPAN_DAYS)
    }

    /// Last day considered covered for a ticker with this watermark.
    pub fn start_after(&self, watermark: &Watermark) -> NaiveDate {
        match watermark.timestamp() {
            Some(ts) if ts.year() >= self.sentinel_year => ts.date(),
            _ => self.floor_date,
        }
    }
}

/// The next window ending at `to`, or `None` once `to` is already covered.
pub fn plan_window(last_known: NaiveDate, to: NaiveDate, span_days: u32) -> Option<FetchWindow> {
    let first_uncovered = last_known.checked_add_days(Days::new(1))?;
    let earliest = to
        .checked_sub_days(Days::new(u64::from(span_days)))
        .unwrap_or(NaiveDate::MIN);
    let from = first_uncovered.max(earliest);
    (from <= to).then(|| FetchWindow::new(from, to))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Exhausted,
    BoundaryReached,
    Stalled,
}

/// Why a window counted as empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmptyReason {
    /// The provider answered with `status = false`.
    Unsuccessful {
        message: String,
        error_code: Option<String>,
    },
    NoRows,
    Transport(String),
    /// Rows came back but did not survive normalization.
    Malformed(String),
}

impl fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyReason::Unsuccessful {
                message,
                error_code: Some(code),
            } => write!(f, "provider error {code}: {message}"),
            EmptyReason::Unsuccessful { message, .. } => write!(f, "provider error: {message}"),
            EmptyReason::NoRows => write!(f, "no rows"),
            EmptyReason::Transport(e) => write!(f, "transport: {e}"),
            EmptyReason::Malformed(e) => write!(f, "malformed payload: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackfillOutcome {
    pub ticker: String,
    pub watermark: Watermark,
    pub start_after: NaiveDate,
    pub termination: Termination,
    /// Every window requested, newest first.
    pub windows: Vec<FetchWindow>,
    pub calls: usize,
    /// Rows discarded by normalization across all windows.
    pub dropped: usize,
    /// Collected rows sorted ascending by timestamp; `None` when nothing came back.
    pub batch: Option<Batch>,
}

impl BackfillOutcome {
    pub fn row_count(&self) -> usize {
        self.batch.as_ref().map_or(0, Batch::len)
    }
}

pub struct BackfillScheduler {
    config: SchedulerConfig,
    pacer: Box<dyn Pacer>,
    clock: Box<dyn Clock>,
}

impl BackfillScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            pacer: Box::new(FixedDelay::default()),
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_pacer(mut self, pacer: Box<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Fetch everything between the ticker's watermark and today.
    ///
    /// Only a failed watermark read is an error; provider trouble shows up in
    /// the outcome's termination and empty windows.
    pub fn backfill(
        &self,
        ticker: &Ticker,
        provider: &dyn CandleProvider,
        watermarks: &WatermarkStore<'_>,
        observer: &dyn IngestObserver,
    ) -> Result<BackfillOutcome, IngestError> {
        let symbol = ticker.symbol.as_str();
        let watermark = watermarks.read(symbol)?;
        let last_known = self.config.start_after(&watermark);
        let substituted = match watermark {
            Watermark::Sentinel(_) => true,
            Watermark::Committed(ts) => ts.year() < self.config.sentinel_year,
            Watermark::Absent => false,
        };
        if substituted {
            observer.sentinel_watermark(symbol, &watermark, self.config.floor_date);
        }
        observer.backfill_started(symbol, &watermark, last_known);

        let mut to = self.clock.today();
        let mut collected = Batch::new();
        let mut windows = Vec::new();
        let mut dropped = 0;
        let mut consecutive_empty = 0u32;

        let span_days = self.config.effective_span_days();
        let termination = loop {
            let Some(window) = plan_window(last_known, to, span_days) else {
                observer.backfill_exhausted(symbol);
                break Termination::Exhausted;
            };
            windows.push(window);
            observer.window_requested(symbol, &window);

            self.pacer.pause();
            let fetched = match provider.get_historical_data(window.from, window.to, &ticker.token)
            {
                Err(e) => Err(EmptyReason::Transport(e.to_string())),
                Ok(resp) if !resp.status => Err(EmptyReason::Unsuccessful {
                    message: resp.message,
                    error_code: resp.error_code,
                }),
                Ok(resp) => match resp.into_rows() {
                    None => Err(EmptyReason::NoRows),
                    Some(rows) => match normalize(&rows, symbol) {
                        Err(e) => Err(EmptyReason::Malformed(e.to_string())),
                        Ok(normalized) => {
                            dropped += normalized.dropped;
                            if normalized.batch.is_empty() {
                                Err(EmptyReason::NoRows)
                            } else {
                                Ok(normalized)
                            }
                        }
                    },
                },
            };

            match fetched {
                Ok(normalized) => {
                    observer.window_fetched(
                        symbol,
                        &window,
                        normalized.batch.len(),
                        normalized.dropped,
                    );
                    collected.append(normalized.batch);
                    consecutive_empty = 0;
                }
                Err(reason) => {
                    consecutive_empty += 1;
                    observer.window_empty(symbol, &window, &reason, consecutive_empty);
                    if consecutive_empty >= self.config.stall_threshold {
                        observer.backfill_stalled(symbol, consecutive_empty);
                        break Termination::Stalled;
                    }
                }
            }

            if window.from <= last_known.checked_add_days(Days::new(1)).unwrap_or(last_known) {
                observer.boundary_reached(symbol, &window);
                break Termination::BoundaryReached;
            }

            to = match window.from.pred_opt() {
                Some(day) => day,
                None => {
                    observer.backfill_exhausted(symbol);
                    break Termination::Exhausted;
                }
            };
        };

        collected.sort_by_timestamp();
        let outcome = BackfillOutcome {
            ticker: symbol.to_string(),
            watermark,
            start_after: last_known,
            termination,
            calls: windows.len(),
            windows,
            dropped,
            batch: (!collected.is_empty()).then_some(collected),
        };
        observer.backfill_finished(&outcome);
        Ok(outcome)
    }
}
