//! Watermark lookup: how far a ticker's committed history reaches.

use super::StoreDriver;
use crate::error::IngestError;
use chrono::NaiveDateTime;
use std::fmt;

/// `1970-01-01T00:00:00`, the value some stores report for "no rows".
pub fn epoch_sentinel() -> NaiveDateTime {
    NaiveDateTime::default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// Latest committed row.
    Committed(NaiveDateTime),
    /// The ticker has no rows.
    Absent,
    /// The store answered with its epoch default.
    Sentinel(NaiveDateTime),
}

impl Watermark {
    /// The committed timestamp, if there is real history.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Watermark::Committed(ts) => Some(*ts),
            Watermark::Absent | Watermark::Sentinel(_) => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Watermark::Sentinel(_))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Committed(ts) => write!(f, "{ts}"),
            Watermark::Absent => write!(f, "none"),
            Watermark::Sentinel(ts) => write!(f, "sentinel ({ts})"),
        }
    }
}

/// Read-only view of the per-ticker watermark in one table.
///
/// Never writes: the watermark moves only because the committer inserted rows.
#[derive(Clone, Copy)]
pub struct WatermarkStore<'a> {
    driver: &'a dyn StoreDriver,
    table: &'a str,
}

impl<'a> WatermarkStore<'a> {
    pub fn new(driver: &'a dyn StoreDriver, table: &'a str) -> Self {
        Self { driver, table }
    }

    pub fn table(&self) -> &str {
        self.table
    }

    /// Store read failures surface as [`IngestError::StoreUnavailable`]; they
    /// are never mistaken for empty history.
    pub fn read(&self, ticker: &str) -> Result<Watermark, IngestError> {
        let latest = self.driver.latest_timestamp(self.table, ticker)?;
        Ok(match latest {
            None => Watermark::Absent,
            Some(ts) if ts == epoch_sentinel() => Watermark::Sentinel(ts),
            Some(ts) => Watermark::Committed(ts),
        })
    }

    pub fn latest_timestamp(&self, ticker: &str) -> Result<Option<NaiveDateTime>, IngestError> {
        Ok(self.read(ticker)?.timestamp())
    }
}
