//! Observer port for ingest progress.
//!
//! The scheduler, committer and run pipeline report through an
//! [`IngestObserver`] handed to them by the caller. Every method has an empty
//! default so observers implement only what they care about.

use super::committer::CommitReport;
use super::scheduler::{BackfillOutcome, EmptyReason};
use crate::domain::{FetchWindow, MonthKey};
use crate::error::IngestError;
use crate::store::Watermark;
use chrono::NaiveDate;
use std::path::Path;

pub trait IngestObserver: Send + Sync {
    /// A ticker's backfill begins; `start_after` is the last day already covered.
    fn backfill_started(&self, _ticker: &str, _watermark: &Watermark, _start_after: NaiveDate) {}

    /// The store answered with its epoch default; the floor date is used instead.
    fn sentinel_watermark(&self, _ticker: &str, _watermark: &Watermark, _floor: NaiveDate) {}

    fn window_requested(&self, _ticker: &str, _window: &FetchWindow) {}

    fn window_fetched(&self, _ticker: &str, _window: &FetchWindow, _rows: usize, _dropped: usize) {}

    fn window_empty(
        &self,
        _ticker: &str,
        _window: &FetchWindow,
        _reason: &EmptyReason,
        _consecutive: u32,
    ) {
    }

    fn backfill_exhausted(&self, _ticker: &str) {}

    fn backfill_stalled(&self, _ticker: &str, _consecutive: u32) {}

    fn boundary_reached(&self, _ticker: &str, _window: &FetchWindow) {}

    fn backfill_finished(&self, _outcome: &BackfillOutcome) {}

    /// Nothing new to commit for this ticker.
    fn no_data(&self, _ticker: &str) {}

    fn schema_mismatch(&self, _ticker: &str, _expected: &[String], _actual: &[String]) {}

    fn partition_committed(&self, _ticker: &str, _month: MonthKey, _rows: usize) {}

    fn partition_failed(
        &self,
        _ticker: &str,
        _month: MonthKey,
        _rows: usize,
        _error: &IngestError,
    ) {
    }

    fn commit_finished(&self, _ticker: &str, _report: &CommitReport) {}

    fn ticker_failed(&self, _ticker: &str, _error: &IngestError) {}

    /// A local source file could not be read and was left out.
    fn source_skipped(&self, _path: &Path, _reason: &str) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl IngestObserver for NullObserver {}

/// Emits structured `tracing` events under the `candlefill::ingest` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl IngestObserver for TracingObserver {
    fn backfill_started(&self, ticker: &str, watermark: &Watermark, start_after: NaiveDate) {
        tracing::info!(target: "candlefill::ingest", ticker, %watermark, %start_after, "backfill started");
    }

    fn sentinel_watermark(&self, ticker: &str, watermark: &Watermark, floor: NaiveDate) {
        tracing::warn!(
            target: "candlefill::ingest",
            ticker,
            %watermark,
            %floor,
            "store returned default timestamp, starting from floor date"
        );
    }

    fn window_requested(&self, ticker: &str, window: &FetchWindow) {
        tracing::debug!(target: "candlefill::ingest", ticker, %window, "requesting window");
    }

    fn window_fetched(&self, ticker: &str, window: &FetchWindow, rows: usize, dropped: usize) {
        tracing::info!(target: "candlefill::ingest", ticker, %window, rows, dropped, "window fetched");
    }

    fn window_empty(
        &self,
        ticker: &str,
        window: &FetchWindow,
        reason: &EmptyReason,
        consecutive: u32,
    ) {
        tracing::warn!(target: "candlefill::ingest", ticker, %window, %reason, consecutive, "no data in window");
    }

    fn backfill_exhausted(&self, ticker: &str) {
        tracing::info!(target: "candlefill::ingest", ticker, "date range exhausted");
    }

    fn backfill_stalled(&self, ticker: &str, consecutive: u32) {
        tracing::warn!(target: "candlefill::ingest", ticker, consecutive, "stalled on consecutive empty windows");
    }

    fn boundary_reached(&self, ticker: &str, window: &FetchWindow) {
        tracing::info!(target: "candlefill::ingest", ticker, %window, "reached committed history");
    }

    fn backfill_finished(&self, outcome: &BackfillOutcome) {
        tracing::info!(
            target: "candlefill::ingest",
            ticker = %outcome.ticker,
            termination = ?outcome.termination,
            calls = outcome.calls,
            rows = outcome.row_count(),
            dropped = outcome.dropped,
            "backfill finished"
        );
    }

    fn no_data(&self, ticker: &str) {
        tracing::info!(target: "candlefill::ingest", ticker, "no data to insert");
    }

    fn schema_mismatch(&self, ticker: &str, expected: &[String], actual: &[String]) {
        tracing::error!(
            target: "candlefill::ingest",
            ticker,
            ?expected,
            ?actual,
            "column list mismatch, nothing inserted"
        );
    }

    fn partition_committed(&self, ticker: &str, month: MonthKey, rows: usize) {
        tracing::info!(target: "candlefill::ingest", ticker, %month, rows, "partition committed");
    }

    fn partition_failed(&self, ticker: &str, month: MonthKey, rows: usize, error: &IngestError) {
        tracing::error!(target: "candlefill::ingest", ticker, %month, rows, %error, "partition failed");
    }

    fn commit_finished(&self, ticker: &str, report: &CommitReport) {
        tracing::info!(
            target: "candlefill::ingest",
            ticker,
            committed = report.committed_rows(),
            failed_partitions = report.failed_count(),
            "commit finished"
        );
    }

    fn ticker_failed(&self, ticker: &str, error: &IngestError) {
        tracing::error!(target: "candlefill::ingest", ticker, %error, "ticker failed");
    }

    fn source_skipped(&self, path: &Path, reason: &str) {
        tracing::warn!(target: "candlefill::ingest", path = %path.display(), reason, "skipping unreadable file");
    }
}
