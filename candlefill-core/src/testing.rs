//! Test doubles shared by unit tests, integration tests and the runner crate.
//!
//! Compiled for `cfg(test)` or with the `testing` feature.

use crate::data::{CandleProvider, HistoricalResponse, ProviderError, RawRow};
use crate::domain::Candle;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::sync::Mutex;

type Script =
    dyn Fn(NaiveDate, NaiveDate, &str) -> Result<HistoricalResponse, ProviderError> + Send + Sync;

/// Provider answering from a closure and recording every request.
pub struct ScriptedProvider {
    script: Box<Script>,
    calls: Mutex<Vec<(NaiveDate, NaiveDate, String)>>,
}

impl ScriptedProvider {
    /// `Some(rows)` is a successful response, `None` a successful one without data.
    pub fn new<F>(rows: F) -> Self
    where
        F: Fn(NaiveDate, NaiveDate, &str) -> Option<Vec<RawRow>> + Send + Sync + 'static,
    {
        Self::with_responses(move |from, to, token| {
            Ok(match rows(from, to, token) {
                Some(data) => HistoricalResponse::ok(data),
                None => HistoricalResponse {
                    status: true,
                    data: None,
                    message: "SUCCESS".into(),
                    error_code: None,
                },
            })
        })
    }

    pub fn with_responses<F>(script: F) -> Self
    where
        F: Fn(NaiveDate, NaiveDate, &str) -> Result<HistoricalResponse, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every `(from, to, token)` requested so far, in order.
    pub fn calls(&self) -> Vec<(NaiveDate, NaiveDate, String)> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl CandleProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn get_historical_data(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        instrument_token: &str,
    ) -> Result<HistoricalResponse, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((from, to, instrument_token.to_string()));
        (self.script)(from, to, instrument_token)
    }
}

/// A raw provider record with flat OHLC at `price`.
pub fn raw_row(timestamp: &str, price: f64, volume: i64) -> RawRow {
    vec![
        Value::from(timestamp),
        Value::from(price),
        Value::from(price),
        Value::from(price),
        Value::from(price),
        Value::from(volume),
    ]
}

pub fn candle(ticker: &str, timestamp: NaiveDateTime, close: f64) -> Candle {
    Candle {
        ticker: ticker.to_string(),
        timestamp,
        open: close,
        high: close,
        low: close,
        close,
        volume: 100,
    }
}
