//! Run orchestration: one store handle, many tickers, one summary.
//!
//! Each ticker is an independent unit of work. A ticker that fails is
//! recorded in the [`RunSummary`] and the run moves on; only failing to
//! prepare the target table in [`IngestPipeline::connect`] aborts everything.

use crate::config::IngestConfig;
use crate::local_source::LocalBatch;
use candlefill_core::data::{normalize, CandleProvider, TableSchema};
use candlefill_core::domain::{Batch, Ticker};
use candlefill_core::error::IngestError;
use candlefill_core::ingest::{
    BackfillScheduler, CommitMode, CommitReport, Committer, IngestObserver, SchedulerConfig,
    Termination,
};
use candlefill_core::store::{StoreDriver, Watermark, WatermarkStore};
use chrono::Datelike;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub table: String,
    pub api_commit: CommitMode,
    pub local_commit: CommitMode,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            table: "candles".into(),
            api_commit: CommitMode::Bulk,
            local_commit: CommitMode::Monthly,
        }
    }
}

impl From<&IngestConfig> for PipelineSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            table: config.table.clone(),
            api_commit: config.api.commit_mode,
            local_commit: config.local.commit_mode,
        }
    }
}

/// What happened to one ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerReport {
    pub ticker: String,
    /// How the backfill loop ended; `None` for local imports.
    pub termination: Option<Termination>,
    /// Rows handed to the committer.
    pub fetched_rows: usize,
    /// Rows dropped by normalization or already covered by the watermark.
    pub skipped_rows: usize,
    pub commit: CommitReport,
}

impl TickerReport {
    /// Nothing new was found for this ticker.
    pub fn is_up_to_date(&self) -> bool {
        self.fetched_rows == 0
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Succeeded tickers that had nothing new.
    pub up_to_date: usize,
    pub reports: Vec<TickerReport>,
    pub errors: Vec<(String, IngestError)>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, ticker: &str, result: Result<TickerReport, IngestError>) {
        self.total += 1;
        match result {
            Ok(report) => {
                if report.commit.is_complete() {
                    self.succeeded += 1;
                    if report.is_up_to_date() {
                        self.up_to_date += 1;
                    }
                } else {
                    self.failed += 1;
                }
                self.reports.push(report);
            }
            Err(e) => {
                self.failed += 1;
                self.errors.push((ticker.to_string(), e));
            }
        }
    }
}

pub struct IngestPipeline<'a> {
    store: &'a dyn StoreDriver,
    settings: PipelineSettings,
    scheduler: BackfillScheduler,
    observer: &'a dyn IngestObserver,
}

impl<'a> IngestPipeline<'a> {
    /// Make sure the target table exists, creating it with the canonical
    /// candle schema when missing.
    pub fn connect(
        store: &'a dyn StoreDriver,
        settings: PipelineSettings,
        observer: &'a dyn IngestObserver,
    ) -> Result<Self, IngestError> {
        if !store.table_exists(&settings.table)? {
            store.create_table(&settings.table, &TableSchema::candles())?;
            info!(store = store.name(), table = %settings.table, "created table");
        }
        Ok(Self {
            store,
            settings,
            scheduler: BackfillScheduler::new(SchedulerConfig::default()),
            observer,
        })
    }

    pub fn with_scheduler(mut self, scheduler: BackfillScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn watermarks(&self) -> WatermarkStore<'_> {
        WatermarkStore::new(self.store, &self.settings.table)
    }

    /// Backfill and commit every ticker in order.
    pub fn run_api(&self, provider: &dyn CandleProvider, tickers: &[Ticker]) -> RunSummary {
        let mut summary = RunSummary::default();
        for ticker in tickers {
            let result = self.ingest_ticker(provider, ticker);
            if let Err(e) = &result {
                self.observer.ticker_failed(&ticker.symbol, e);
            }
            summary.record(&ticker.symbol, result);
        }
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            up_to_date = summary.up_to_date,
            "api run finished"
        );
        summary
    }

    pub fn ingest_ticker(
        &self,
        provider: &dyn CandleProvider,
        ticker: &Ticker,
    ) -> Result<TickerReport, IngestError> {
        let outcome = self
            .scheduler
            .backfill(ticker, provider, &self.watermarks(), self.observer)?;
        let batch = outcome.batch.unwrap_or_default();
        let commit = Committer::new(self.settings.api_commit).commit(
            self.store,
            &self.settings.table,
            &batch,
            &ticker.symbol,
            self.observer,
        )?;
        Ok(TickerReport {
            ticker: ticker.symbol.clone(),
            termination: Some(outcome.termination),
            fetched_rows: batch.len(),
            skipped_rows: outcome.dropped,
            commit,
        })
    }

    /// Import every group yielded by a local source.
    pub fn run_local<I>(&self, groups: I) -> RunSummary
    where
        I: IntoIterator<Item = Vec<LocalBatch>>,
    {
        let mut summary = RunSummary::default();
        for (i, group) in groups.into_iter().enumerate() {
            info!(group = i + 1, files = group.len(), "importing local group");
            for local in &group {
                let result = self.ingest_local(local);
                if let Err(e) = &result {
                    self.observer.ticker_failed(&local.ticker, e);
                }
                summary.record(&local.ticker, result);
            }
        }
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            up_to_date = summary.up_to_date,
            "local run finished"
        );
        summary
    }

    /// Normalize, drop rows the store already covers, sort, commit.
    pub fn ingest_local(&self, local: &LocalBatch) -> Result<TickerReport, IngestError> {
        let normalized = normalize(&local.rows, &local.ticker)?;
        let mut batch: Batch = normalized.batch;
        let mut skipped = normalized.dropped;

        let sentinel_year = self.scheduler.config().sentinel_year;
        if let Watermark::Committed(ts) = self.watermarks().read(&local.ticker)? {
            if ts.year() >= sentinel_year {
                skipped += batch.retain_after(ts);
            }
        }
        batch.sort_by_timestamp();

        let commit = Committer::new(self.settings.local_commit).commit(
            self.store,
            &self.settings.table,
            &batch,
            &local.ticker,
            self.observer,
        )?;
        Ok(TickerReport {
            ticker: local.ticker.clone(),
            termination: None,
            fetched_rows: batch.len(),
            skipped_rows: skipped,
            commit,
        })
    }
}
