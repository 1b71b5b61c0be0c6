//! An ordered run of normalized candles owned by one ticker's backfill.

use super::candle::{Candle, CANDLE_COLUMNS};
use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Calendar month used as the commit partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(ts: &NaiveDateTime) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    rows: Vec<Candle>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Candle>) -> Self {
        Self { rows }
    }

    /// Column names of every row in the batch, in stored order.
    pub fn columns(&self) -> Vec<String> {
        CANDLE_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    pub fn rows(&self) -> &[Candle] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Candle> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn append(&mut self, other: Batch) {
        self.rows.extend(other.rows);
    }

    /// Stable ascending sort on timestamp; rows with equal timestamps keep
    /// their arrival order.
    pub fn sort_by_timestamp(&mut self) {
        self.rows.sort_by_key(|c| c.timestamp);
    }

    pub fn is_sorted_by_timestamp(&self) -> bool {
        self.rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.rows.iter().map(|c| c.timestamp).min()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.rows.iter().map(|c| c.timestamp).max()
    }

    /// First ticker tag that differs from `expected`, if any.
    pub fn foreign_ticker(&self, expected: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|c| c.ticker != expected)
            .map(|c| c.ticker.as_str())
    }

    /// Keep only rows strictly newer than `watermark`.
    pub fn retain_after(&mut self, watermark: NaiveDateTime) -> usize {
        let before = self.rows.len();
        self.rows.retain(|c| c.timestamp > watermark);
        before - self.rows.len()
    }

    /// Split into calendar-month groups, ascending by month. Row order inside a
    /// group follows the batch order.
    pub fn partition_by_month(&self) -> Vec<(MonthKey, Batch)> {
        let mut by_month: BTreeMap<MonthKey, Vec<Candle>> = BTreeMap::new();
        for row in &self.rows {
            by_month
                .entry(MonthKey::of(&row.timestamp))
                .or_default()
                .push(row.clone());
        }
        by_month
            .into_iter()
            .map(|(key, rows)| (key, Batch::from_rows(rows)))
            .collect()
    }
}

impl FromIterator<Candle> for Batch {
    fn from_iter<I: IntoIterator<Item = Candle>>(iter: I) -> Self {
        Self::from_rows(iter.into_iter().collect())
    }
}
