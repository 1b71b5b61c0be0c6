//! Candle and Ticker: the units the engine moves around.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column order of a normalized candle row, as stored.
pub const CANDLE_COLUMNS: [&str; 7] = [
    "ticker",
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
];

/// Column order of a raw provider record.
pub const RAW_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// One normalized OHLCV row.
///
/// `timestamp` is exchange-local wall time with no offset attached. Prices and
/// volume are never negative once they leave the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ticker: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Candle {
    /// True when every price field is non-negative and finite.
    pub fn is_clean(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TickerError {
    #[error("ticker symbol must not be empty")]
    EmptySymbol,

    #[error("instrument token for '{0}' must not be empty")]
    EmptyToken(String),
}

/// A tradable instrument: the store key plus the provider's instrument token.
///
/// Symbols are compared verbatim; no case folding happens anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub token: String,
}

impl Ticker {
    pub fn new(symbol: impl Into<String>, token: impl Into<String>) -> Result<Self, TickerError> {
        let symbol = symbol.into();
        let token = token.into();
        if symbol.trim().is_empty() {
            return Err(TickerError::EmptySymbol);
        }
        if token.trim().is_empty() {
            return Err(TickerError::EmptyToken(symbol));
        }
        Ok(Self { symbol, token })
    }
}
