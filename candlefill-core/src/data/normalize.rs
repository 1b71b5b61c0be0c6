//! Raw provider records to canonical candles.
//!
//! Everything upstream of this module is loosely typed (`serde_json::Value`
//! cells); everything downstream works with [`Candle`]. The conversion is a
//! pure function of its inputs.

use super::provider::RawRow;
use crate::domain::{Batch, Candle, RAW_COLUMNS};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use thiserror::Error;

/// Epoch integers at or above this magnitude are milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("row {row}: expected {expected} fields (timestamp, open, high, low, close, volume), got {actual}")]
    SchemaMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("row {row}: unparseable timestamp {value}")]
    InvalidTimestamp { row: usize, value: String },

    #[error("row {row}: non-numeric {column} value {value}")]
    InvalidNumber {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("ticker must not be empty")]
    EmptyTicker,
}

/// Output of [`normalize`]: the rows that survived, and how many did not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub batch: Batch,
    pub dropped: usize,
}

/// Convert raw `(timestamp, open, high, low, close, volume)` records into
/// candles tagged with `ticker`.
///
/// Missing numeric cells are forward-filled from the previous record. Records
/// that still lack a value afterwards (a leading gap, or no timestamp at all)
/// are dropped and counted. Prices and volume are clamped at zero. Output row
/// order follows input order but callers must not rely on it.
pub fn normalize(raw_rows: &[RawRow], ticker: &str) -> Result<NormalizedBatch, NormalizeError> {
    if ticker.trim().is_empty() {
        return Err(NormalizeError::EmptyTicker);
    }

    let mut last_seen: [Option<f64>; 5] = [None; 5];
    let mut rows = Vec::with_capacity(raw_rows.len());
    let mut dropped = 0;

    for (i, raw) in raw_rows.iter().enumerate() {
        if raw.len() != RAW_COLUMNS.len() {
            return Err(NormalizeError::SchemaMismatch {
                row: i,
                expected: RAW_COLUMNS.len(),
                actual: raw.len(),
            });
        }

        let timestamp = parse_timestamp_cell(&raw[0], i)?;

        let mut values = [0.0; 5];
        let mut complete = true;
        for (slot, cell) in raw[1..].iter().enumerate() {
            if let Some(v) = parse_number_cell(cell, i, RAW_COLUMNS[slot + 1])? {
                last_seen[slot] = Some(v);
            }
            match last_seen[slot] {
                Some(v) => values[slot] = v,
                None => complete = false,
            }
        }

        let timestamp = match timestamp {
            Some(ts) if complete => ts,
            _ => {
                dropped += 1;
                continue;
            }
        };

        let [open, high, low, close, volume] = values.map(|v| v.max(0.0));
        rows.push(Candle {
            ticker: ticker.to_string(),
            timestamp,
            open,
            high,
            low,
            close,
            volume: volume.round() as u64,
        });
    }

    Ok(NormalizedBatch {
        batch: Batch::from_rows(rows),
        dropped,
    })
}

/// Parse a textual timestamp into exchange-local wall time.
///
/// An explicit UTC offset is discarded, not applied: `09:15+05:30` stays
/// `09:15`.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.naive_local());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

fn parse_timestamp_cell(cell: &Value, row: usize) -> Result<Option<NaiveDateTime>, NormalizeError> {
    let invalid = || NormalizeError::InvalidTimestamp {
        row,
        value: cell.to_string(),
    };
    match cell {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_timestamp(s).map(Some).ok_or_else(invalid),
        Value::Number(n) => {
            let epoch = n.as_i64().ok_or_else(invalid)?;
            let parsed = if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
                DateTime::from_timestamp_millis(epoch)
            } else {
                DateTime::from_timestamp(epoch, 0)
            };
            parsed.map(|dt| Some(dt.naive_utc())).ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

fn parse_number_cell(
    cell: &Value,
    row: usize,
    column: &'static str,
) -> Result<Option<f64>, NormalizeError> {
    let invalid = || NormalizeError::InvalidNumber {
        row,
        column,
        value: cell.to_string(),
    };
    let parsed = match cell {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64().ok_or_else(invalid)?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("nan") {
                return Ok(None);
            }
            s.parse::<f64>().map_err(|_| invalid())?
        }
        _ => return Err(invalid()),
    };
    if parsed.is_nan() {
        return Ok(None);
    }
    if !parsed.is_finite() {
        return Err(invalid());
    }
    Ok(Some(parsed))
}
