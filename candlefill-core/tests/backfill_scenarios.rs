//! End-to-end backfill scenarios against the in-memory store.
//!
//! Covers:
//! 1. Idempotence: a second run with no new upstream data adds nothing
//! 2. Watermark resume: the first window starts the day after the watermark
//! 3. Stall termination after consecutive empty windows
//! 4. Monthly partition isolation when one month fails
//! 5. A ticker with no history, one window, one commit
//! 6. Store read failures abort the ticker before any provider call

use candlefill_core::data::{HistoricalResponse, ProviderError, TableSchema};
use candlefill_core::domain::{Batch, Candle, FetchWindow, MonthKey, Ticker};
use candlefill_core::ingest::{
    BackfillScheduler, CommitMode, Committer, EmptyReason, FixedClock, IngestObserver, NoDelay,
    NullObserver, PartitionOutcome, SchedulerConfig, Termination,
};
use candlefill_core::store::{
    MemoryStore, StoreDriver, StoreError, TickerStats, Watermark, WatermarkStore,
};
use candlefill_core::testing::{candle, raw_row, ScriptedProvider};
use candlefill_core::IngestError;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::sync::Mutex;

// ── Helpers ──────────────────────────────────────────────────────────

const TABLE: &str = "candles";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(d: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    d.and_hms_opt(h, m, 0).unwrap()
}

fn scheduler(today: NaiveDate) -> BackfillScheduler {
    BackfillScheduler::new(SchedulerConfig::default())
        .with_pacer(Box::new(NoDelay))
        .with_clock(Box::new(FixedClock(today)))
}

fn abc() -> Ticker {
    Ticker::new("ABC", "3045").unwrap()
}

fn store() -> MemoryStore {
    let store = MemoryStore::new();
    store.create_table(TABLE, &TableSchema::candles()).unwrap();
    store
}

/// One 09:15 candle for every day in the requested window.
fn daily_provider() -> ScriptedProvider {
    ScriptedProvider::new(|from, to, _| {
        let rows = from
            .iter_days()
            .take_while(|d| *d <= to)
            .map(|d| raw_row(&format!("{d} 09:15"), 100.0, 1_000))
            .collect();
        Some(rows)
    })
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, e: impl Into<String>) {
        self.events.lock().unwrap().push(e.into());
    }
}

impl IngestObserver for RecordingObserver {
    fn sentinel_watermark(&self, _: &str, _: &Watermark, _: NaiveDate) {
        self.push("sentinel");
    }
    fn window_empty(&self, _: &str, _: &FetchWindow, reason: &EmptyReason, n: u32) {
        self.push(format!("empty:{n}:{reason}"));
    }
    fn backfill_exhausted(&self, _: &str) {
        self.push("exhausted");
    }
    fn backfill_stalled(&self, _: &str, _: u32) {
        self.push("stalled");
    }
    fn boundary_reached(&self, _: &str, _: &FetchWindow) {
        self.push("boundary");
    }
    fn no_data(&self, _: &str) {
        self.push("no_data");
    }
    fn partition_failed(&self, _: &str, month: MonthKey, rows: usize, _: &IngestError) {
        self.push(format!("failed:{month}:{rows}"));
    }
}

/// Delegates to a MemoryStore but refuses inserts touching one month.
struct FlakyStore {
    inner: MemoryStore,
    bad_month: MonthKey,
}

impl StoreDriver for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }
    fn latest_timestamp(&self, t: &str, k: &str) -> Result<Option<NaiveDateTime>, StoreError> {
        self.inner.latest_timestamp(t, k)
    }
    fn columns(&self, t: &str) -> Result<Vec<String>, StoreError> {
        self.inner.columns(t)
    }
    fn insert(&self, t: &str, rows: &[Candle]) -> Result<usize, StoreError> {
        if rows.iter().any(|c| MonthKey::of(&c.timestamp) == self.bad_month) {
            return Err(StoreError::Unavailable("write timed out".into()));
        }
        self.inner.insert(t, rows)
    }
    fn table_exists(&self, t: &str) -> Result<bool, StoreError> {
        self.inner.table_exists(t)
    }
    fn create_table(&self, t: &str, s: &TableSchema) -> Result<(), StoreError> {
        self.inner.create_table(t, s)
    }
    fn stats(&self, t: &str, k: &str) -> Result<Option<TickerStats>, StoreError> {
        self.inner.stats(t, k)
    }
}

// ── 1. Idempotence ───────────────────────────────────────────────────

#[test]
fn second_run_without_new_data_adds_nothing() {
    let store = store();
    let provider = daily_provider();
    let today = date(2016, 3, 15);
    let watermarks = WatermarkStore::new(&store, TABLE);
    let committer = Committer::new(CommitMode::Monthly);

    let first = scheduler(today)
        .backfill(&abc(), &provider, &watermarks, &NullObserver)
        .unwrap();
    let batch = first.batch.unwrap();
    committer
        .commit(&store, TABLE, &batch, "ABC", &NullObserver)
        .unwrap();
    let rows_after_first = store.row_count(TABLE);
    assert_eq!(rows_after_first, batch.len());
    assert_eq!(
        store.stats(TABLE, "ABC").unwrap().unwrap().first_timestamp,
        at(date(2016, 1, 2), 9, 15)
    );

    let calls_before = provider.call_count();
    let observer = RecordingObserver::default();
    let second = scheduler(today)
        .backfill(&abc(), &provider, &watermarks, &observer)
        .unwrap();
    assert_eq!(second.termination, Termination::Exhausted);
    assert_eq!(provider.call_count(), calls_before);
    assert!(second.batch.is_none());
    assert_eq!(observer.events(), vec!["exhausted"]);
    assert_eq!(store.row_count(TABLE), rows_after_first);
}

// ── 2. Watermark resume ──────────────────────────────────────────────

#[test]
fn resumes_the_day_after_the_watermark() {
    let store = store();
    store
        .insert(TABLE, &[candle("ABC", at(date(2024, 6, 15), 15, 29), 10.0)])
        .unwrap();
    let provider = daily_provider();

    let outcome = scheduler(date(2024, 7, 1))
        .backfill(&abc(), &provider, &WatermarkStore::new(&store, TABLE), &NullObserver)
        .unwrap();

    assert_eq!(
        provider.calls()[0],
        (date(2024, 6, 16), date(2024, 7, 1), "3045".to_string())
    );
    assert_eq!(outcome.termination, Termination::BoundaryReached);
    assert_eq!(outcome.calls, 1);
    assert_eq!(outcome.row_count(), 16);
}

#[test]
fn epoch_default_is_treated_as_no_history() {
    let store = MemoryStore::new().with_epoch_default();
    store.create_table(TABLE, &TableSchema::candles()).unwrap();
    let provider = daily_provider();
    let observer = RecordingObserver::default();

    let outcome = scheduler(date(2016, 1, 20))
        .backfill(&abc(), &provider, &WatermarkStore::new(&store, TABLE), &observer)
        .unwrap();

    assert!(outcome.watermark.is_sentinel());
    assert_eq!(outcome.start_after, date(2016, 1, 1));
    assert_eq!(provider.calls()[0].0, date(2016, 1, 2));
    assert_eq!(observer.events(), vec!["sentinel", "boundary"]);
}

// ── 3. Stall termination ─────────────────────────────────────────────

#[test]
fn three_empty_windows_stall() {
    let store = store();
    let provider = ScriptedProvider::new(|_, _, _| None);
    let observer = RecordingObserver::default();

    let outcome = scheduler(date(2024, 7, 1))
        .backfill(&abc(), &provider, &WatermarkStore::new(&store, TABLE), &observer)
        .unwrap();

    assert_eq!(outcome.termination, Termination::Stalled);
    assert_eq!(provider.call_count(), 3);
    assert!(outcome.batch.is_none());
    assert_eq!(
        observer.events(),
        vec!["empty:1:no rows", "empty:2:no rows", "empty:3:no rows", "stalled"]
    );
}

#[test]
fn data_resets_the_empty_counter() {
    let store = store();
    // Windows back from 2024-07-01: [06-02, 07-01], [05-03, 06-01], [04-03, 05-02], ...
    // Only the third one has data; newer windows fail in transport, older
    // ones come back unsuccessful.
    let day = date(2024, 4, 20);
    let provider = ScriptedProvider::with_responses(move |from, to, _| {
        if from <= day && day <= to {
            Ok(HistoricalResponse::ok(vec![raw_row("2024-04-20 09:15", 5.0, 10)]))
        } else if from > day {
            Err(ProviderError::NetworkUnreachable("connection reset".into()))
        } else {
            Ok(HistoricalResponse::failed("No data", "AB1004"))
        }
    });

    let outcome = scheduler(date(2024, 7, 1))
        .backfill(&abc(), &provider, &WatermarkStore::new(&store, TABLE), &NullObserver)
        .unwrap();

    assert_eq!(outcome.termination, Termination::Stalled);
    assert_eq!(outcome.calls, 6);
    assert_eq!(outcome.row_count(), 1);
}

// ── 4. Partition isolation ───────────────────────────────────────────

#[test]
fn failing_month_does_not_block_the_others() {
    let flaky = FlakyStore {
        inner: store(),
        bad_month: MonthKey { year: 2024, month: 2 },
    };
    let batch: Batch = [(1, 10), (1, 11), (2, 5), (3, 1), (3, 2), (3, 3)]
        .iter()
        .map(|&(m, d)| candle("ABC", at(date(2024, m, d), 9, 15), 1.0))
        .collect();
    let observer = RecordingObserver::default();

    let report = Committer::new(CommitMode::Monthly)
        .commit(&flaky, TABLE, &batch, "ABC", &observer)
        .unwrap();

    assert_eq!(report.partitions.len(), 3);
    assert_eq!(report.partitions[0].outcome, PartitionOutcome::Committed(2));
    assert!(matches!(report.partitions[1].outcome, PartitionOutcome::Failed(_)));
    assert_eq!(report.partitions[2].outcome, PartitionOutcome::Committed(3));
    assert_eq!(report.committed_rows(), 5);
    assert_eq!(observer.events(), vec!["failed:2024-02:1"]);

    let stored = flaky.inner.rows(TABLE, "ABC");
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().any(|c| c.timestamp.month() == 3));
}

#[test]
fn bulk_failure_is_an_error() {
    let flaky = FlakyStore {
        inner: store(),
        bad_month: MonthKey { year: 2024, month: 2 },
    };
    let batch = Batch::from_rows(vec![
        candle("ABC", at(date(2024, 1, 10), 9, 15), 1.0),
        candle("ABC", at(date(2024, 2, 10), 9, 15), 1.0),
    ]);
    let err = Committer::new(CommitMode::Bulk)
        .commit(&flaky, TABLE, &batch, "ABC", &NullObserver)
        .unwrap_err();
    assert!(matches!(err, IngestError::StoreUnavailable(_)));
    assert_eq!(flaky.inner.row_count(TABLE), 0);
}

// ── 5. New ticker, single window ─────────────────────────────────────

#[test]
fn new_ticker_single_window_single_commit() {
    let store = store();
    // Ten rows, deliberately out of order.
    let provider = ScriptedProvider::new(|_, _, _| {
        Some(
            [7, 3, 9, 1, 5, 2, 10, 4, 8, 6]
                .iter()
                .map(|d| raw_row(&format!("2016-01-{:02}T09:15:00+05:30", d + 10), 50.0, 200))
                .collect(),
        )
    });

    let outcome = scheduler(date(2016, 1, 30))
        .backfill(&abc(), &provider, &WatermarkStore::new(&store, TABLE), &NullObserver)
        .unwrap();

    assert_eq!(
        provider.calls(),
        vec![(date(2016, 1, 2), date(2016, 1, 30), "3045".to_string())]
    );
    assert_eq!(outcome.termination, Termination::BoundaryReached);
    let batch = outcome.batch.unwrap();
    assert_eq!(batch.len(), 10);
    assert!(batch.is_sorted_by_timestamp());
    assert_eq!(batch.rows()[0].timestamp, at(date(2016, 1, 11), 9, 15));

    let report = Committer::new(CommitMode::Bulk)
        .commit(&store, TABLE, &batch, "ABC", &NullObserver)
        .unwrap();
    assert_eq!(report.committed_rows(), 10);
    assert_eq!(store.insert_calls(TABLE), 1);
}

#[test]
fn later_today_takes_two_windows() {
    let store = store();
    let provider = daily_provider();
    let outcome = scheduler(date(2016, 2, 15))
        .backfill(&abc(), &provider, &WatermarkStore::new(&store, TABLE), &NullObserver)
        .unwrap();
    assert_eq!(
        outcome.windows,
        vec![
            FetchWindow::new(date(2016, 1, 17), date(2016, 2, 15)),
            FetchWindow::new(date(2016, 1, 2), date(2016, 1, 16)),
        ]
    );
}

// ── 6. Store failures ────────────────────────────────────────────────

#[test]
fn unreadable_watermark_aborts_before_fetching() {
    let store = MemoryStore::new();
    let provider = daily_provider();
    let err = scheduler(date(2024, 7, 1))
        .backfill(&abc(), &provider, &WatermarkStore::new(&store, TABLE), &NullObserver)
        .unwrap_err();
    assert!(matches!(err, IngestError::StoreUnavailable(StoreError::TableMissing(_))));
    assert_eq!(provider.call_count(), 0);
}

#[test]
fn empty_outcome_commits_nothing() {
    let store = store();
    let observer = RecordingObserver::default();
    let report = Committer::new(CommitMode::Monthly)
        .commit(&store, TABLE, &Batch::new(), "ABC", &observer)
        .unwrap();
    assert!(report.partitions.is_empty());
    assert_eq!(observer.events(), vec!["no_data"]);
}
