//! Partitioned commit of one ticker's batch.

use super::observer::IngestObserver;
use crate::domain::{Batch, MonthKey};
use crate::error::IngestError;
use crate::store::StoreDriver;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// One insert for the whole batch.
    #[default]
    Bulk,
    /// One insert per calendar month, each allowed to fail on its own.
    Monthly,
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitMode::Bulk => write!(f, "bulk"),
            CommitMode::Monthly => write!(f, "monthly"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartitionOutcome {
    Committed(usize),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionReport {
    /// `None` for a bulk commit.
    pub month: Option<MonthKey>,
    pub rows: usize,
    pub outcome: PartitionOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitReport {
    pub ticker: String,
    pub mode: CommitMode,
    pub partitions: Vec<PartitionReport>,
}

impl CommitReport {
    fn new(ticker: &str, mode: CommitMode) -> Self {
        Self {
            ticker: ticker.to_string(),
            mode,
            partitions: Vec::new(),
        }
    }

    pub fn committed_rows(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| match p.outcome {
                PartitionOutcome::Committed(n) => n,
                PartitionOutcome::Failed(_) => 0,
            })
            .sum()
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions
            .iter()
            .filter(|p| matches!(p.outcome, PartitionOutcome::Failed(_)))
    }

    pub fn is_complete(&self) -> bool {
        self.failed_count() == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Committer {
    mode: CommitMode,
}

impl Committer {
    pub fn new(mode: CommitMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    /// Commit `batch` for `ticker` into `table`.
    ///
    /// Every row must be tagged with `ticker`. In bulk mode a column mismatch
    /// or store failure is returned as an error and nothing is written. In
    /// monthly mode each month is checked and written independently and
    /// failures land in the report.
    pub fn commit(
        &self,
        store: &dyn StoreDriver,
        table: &str,
        batch: &Batch,
        ticker: &str,
        observer: &dyn IngestObserver,
    ) -> Result<CommitReport, IngestError> {
        if let Some(found) = batch.foreign_ticker(ticker) {
            return Err(IngestError::TickerMismatch {
                expected: ticker.to_string(),
                found: found.to_string(),
            });
        }

        let mut report = CommitReport::new(ticker, self.mode);
        if batch.is_empty() {
            observer.no_data(ticker);
            return Ok(report);
        }

        let sorted: Cow<'_, Batch> = if batch.is_sorted_by_timestamp() {
            Cow::Borrowed(batch)
        } else {
            let mut owned = batch.clone();
            owned.sort_by_timestamp();
            Cow::Owned(owned)
        };

        match self.mode {
            CommitMode::Bulk => {
                let written = insert_checked(store, table, &sorted, ticker, observer)?;
                report.partitions.push(PartitionReport {
                    month: None,
                    rows: sorted.len(),
                    outcome: PartitionOutcome::Committed(written),
                });
            }
            CommitMode::Monthly => {
                for (month, part) in sorted.partition_by_month() {
                    let rows = part.len();
                    let outcome = match insert_checked(store, table, &part, ticker, observer) {
                        Ok(written) => {
                            observer.partition_committed(ticker, month, written);
                            PartitionOutcome::Committed(written)
                        }
                        Err(e) => {
                            observer.partition_failed(ticker, month, rows, &e);
                            PartitionOutcome::Failed(e.to_string())
                        }
                    };
                    report.partitions.push(PartitionReport {
                        month: Some(month),
                        rows,
                        outcome,
                    });
                }
            }
        }

        observer.commit_finished(ticker, &report);
        Ok(report)
    }
}

fn insert_checked(
    store: &dyn StoreDriver,
    table: &str,
    batch: &Batch,
    ticker: &str,
    observer: &dyn IngestObserver,
) -> Result<usize, IngestError> {
    let actual = store.columns(table)?;
    let expected = batch.columns();
    if actual != expected {
        observer.schema_mismatch(ticker, &expected, &actual);
        return Err(IngestError::SchemaMismatch { expected, actual });
    }
    Ok(store.insert(table, batch.rows())?)
}
