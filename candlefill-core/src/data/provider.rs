//! Candle provider trait and structured error types.
//!
//! The CandleProvider trait abstracts over upstream market-data sources (a
//! broker's historical-candle endpoint, Yahoo's chart API, scripted test
//! doubles) so the scheduler never depends on one wire format.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One loosely-typed provider record in `(timestamp, open, high, low, close,
/// volume)` order. Strict typing happens in the normalizer.
pub type RawRow = Vec<Value>;

/// Transport-level failures from a provider.
///
/// The scheduler treats every one of these as an empty window; they are
/// displayable so they can be logged alongside the window that produced them.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("provider error: {0}")]
    Other(String),
}

/// Envelope returned by a historical-data call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalResponse {
    pub status: bool,
    pub data: Option<Vec<RawRow>>,
    pub message: String,
    pub error_code: Option<String>,
}

impl HistoricalResponse {
    pub fn ok(rows: Vec<RawRow>) -> Self {
        Self {
            status: true,
            data: Some(rows),
            message: "SUCCESS".into(),
            error_code: None,
        }
    }

    pub fn failed(message: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            status: false,
            data: None,
            message: message.into(),
            error_code: Some(error_code.into()),
        }
    }

    pub fn row_count(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// The rows, if and only if the call succeeded and returned at least one.
    pub fn into_rows(self) -> Option<Vec<RawRow>> {
        if !self.status {
            return None;
        }
        self.data.filter(|rows| !rows.is_empty())
    }
}

/// Upstream source of historical candles.
///
/// Implementations handle authentication, transport and their own retry
/// policy. Session setup happens before the provider reaches the scheduler.
pub trait CandleProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch candles for `instrument_token` over the inclusive date range.
    fn get_historical_data(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        instrument_token: &str,
    ) -> Result<HistoricalResponse, ProviderError>;
}
