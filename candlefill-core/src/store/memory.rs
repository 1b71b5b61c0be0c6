//! In-process store driver.

use super::{epoch_sentinel, StoreDriver, StoreError, TickerStats};
use crate::data::TableSchema;
use crate::domain::Candle;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemTable {
    columns: Vec<String>,
    rows: BTreeMap<(String, NaiveDateTime), Candle>,
    insert_calls: usize,
}

/// Keeps tables in a `Mutex<HashMap>`. Upserts on `(ticker, timestamp)` like
/// the Parquet driver.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, MemTable>>,
    epoch_default: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `latest_timestamp` with `1970-01-01T00:00:00` for tickers
    /// without rows, as columnar stores returning a typed default do.
    pub fn with_epoch_default(mut self) -> Self {
        self.epoch_default = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemTable>> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every stored row of `ticker`, ascending by timestamp.
    pub fn rows(&self, table: &str, ticker: &str) -> Vec<Candle> {
        self.lock()
            .get(table)
            .map(|t| {
                t.rows
                    .values()
                    .filter(|c| c.ticker == ticker)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().get(table).map_or(0, |t| t.rows.len())
    }

    /// Number of `insert` calls that reached the table.
    pub fn insert_calls(&self, table: &str) -> usize {
        self.lock().get(table).map_or(0, |t| t.insert_calls)
    }
}

impl StoreDriver for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn latest_timestamp(
        &self,
        table: &str,
        ticker: &str,
    ) -> Result<Option<NaiveDateTime>, StoreError> {
        let tables = self.lock();
        let t = tables
            .get(table)
            .ok_or_else(|| StoreError::TableMissing(table.to_string()))?;
        let latest = t
            .rows
            .keys()
            .filter(|(sym, _)| sym == ticker)
            .map(|(_, ts)| *ts)
            .max();
        Ok(match latest {
            None if self.epoch_default => Some(epoch_sentinel()),
            other => other,
        })
    }

    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        self.lock()
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| StoreError::TableMissing(table.to_string()))
    }

    fn insert(&self, table: &str, rows: &[Candle]) -> Result<usize, StoreError> {
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableMissing(table.to_string()))?;
        t.insert_calls += 1;
        for row in rows {
            t.rows
                .insert((row.ticker.clone(), row.timestamp), row.clone());
        }
        Ok(rows.len())
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.lock().contains_key(table))
    }

    fn create_table(&self, table: &str, schema: &TableSchema) -> Result<(), StoreError> {
        self.lock()
            .entry(table.to_string())
            .or_insert_with(|| MemTable {
                columns: schema.column_names(),
                ..MemTable::default()
            });
        Ok(())
    }

    fn stats(&self, table: &str, ticker: &str) -> Result<Option<TickerStats>, StoreError> {
        let tables = self.lock();
        let t = tables
            .get(table)
            .ok_or_else(|| StoreError::TableMissing(table.to_string()))?;
        let mut stamps = t
            .rows
            .keys()
            .filter(|(sym, _)| sym == ticker)
            .map(|(_, ts)| *ts);
        let Some(first) = stamps.next() else {
            return Ok(None);
        };
        let (rows, last) = stamps.fold((1, first), |(n, _), ts| (n + 1, ts));
        Ok(Some(TickerStats {
            ticker: ticker.to_string(),
            rows,
            first_timestamp: first,
            last_timestamp: last,
        }))
    }
}
