//! Yahoo Finance chart adapter.
//!
//! Implements [`CandleProvider`] over Yahoo's v8 chart API. The instrument
//! token is the Yahoo symbol. Epoch timestamps are rendered as RFC 3339 in the
//! exchange's own UTC offset so the normalizer keeps exchange-local wall time.
//!
//! Yahoo has no official API and changes its format without notice; the local
//! CSV import path is the fallback when it is unavailable.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{CandleProvider, HistoricalResponse, ProviderError, RawRow};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i32,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
    interval: String,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            base_url: DEFAULT_BASE_URL.to_string(),
            interval: "1d".to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Candle interval passed to the chart API (`1d`, `1h`, `5m`, ...).
    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = interval.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn chart_url(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> String {
        let period1 = from.and_time(NaiveTime::MIN).and_utc().timestamp();
        let period2 = to.and_time(NaiveTime::MIN).and_utc().timestamp() + 86_399;
        format!(
            "{}/{symbol}?period1={period1}&period2={period2}&interval={}",
            self.base_url, self.interval
        )
    }

    fn fetch_with_retry(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HistoricalResponse, ProviderError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(ProviderError::CircuitBreakerTripped);
        }

        let url = self.chart_url(symbol, from, to);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
            }
            if !self.circuit_breaker.is_allowed() {
                return Err(ProviderError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(&url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(ProviderError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(ProviderError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(ProviderError::CircuitBreakerTripped);
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after_secs = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                last_error = Some(ProviderError::RateLimited { retry_after_secs });
                continue;
            }
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ProviderError::AuthenticationRequired(
                    "Yahoo Finance requires authentication".into(),
                ));
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(HistoricalResponse::failed(
                    format!("symbol {symbol} not found"),
                    "404",
                ));
            }
            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(ProviderError::Other(format!("HTTP {status} for {symbol}")));
                continue;
            }

            let body = resp.text().map_err(|e| {
                ProviderError::ResponseFormatChanged(format!("unreadable body for {symbol}: {e}"))
            })?;
            let parsed = parse_chart(&body)?;
            self.circuit_breaker.record_success();
            return Ok(parsed);
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Other("max retries exceeded".into())))
    }
}

impl CandleProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn get_historical_data(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        instrument_token: &str,
    ) -> Result<HistoricalResponse, ProviderError> {
        self.fetch_with_retry(instrument_token, from, to)
    }
}

/// Convert a chart API body into a provider envelope.
///
/// A chart-level error (unknown symbol, no data in range) becomes an
/// unsuccessful envelope; a body that no longer matches the known layout is a
/// [`ProviderError::ResponseFormatChanged`].
pub fn parse_chart(body: &str) -> Result<HistoricalResponse, ProviderError> {
    let resp: ChartResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::ResponseFormatChanged(format!("chart body: {e}")))?;

    let data = match resp.chart.result.and_then(|r| r.into_iter().next()) {
        Some(data) => data,
        None => {
            return Ok(match resp.chart.error {
                Some(err) => HistoricalResponse::failed(err.description, err.code),
                None => HistoricalResponse::failed("empty chart result", "EMPTY"),
            })
        }
    };

    let gmtoffset = data.meta.map_or(0, |m| m.gmtoffset);
    let offset = FixedOffset::east_opt(gmtoffset).ok_or_else(|| {
        ProviderError::ResponseFormatChanged(format!("invalid gmtoffset: {gmtoffset}"))
    })?;

    // Yahoo omits the timestamp array entirely when the range has no trading days.
    let timestamps = data.timestamp.unwrap_or_default();
    let quote = match data.indicators.quote.into_iter().next() {
        Some(q) => q,
        None if timestamps.is_empty() => return Ok(HistoricalResponse::ok(Vec::new())),
        None => {
            return Err(ProviderError::ResponseFormatChanged(
                "timestamps without quote data".into(),
            ))
        }
    };

    let mut rows: Vec<RawRow> = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let open = quote.open.get(i).copied().flatten();
        let high = quote.high.get(i).copied().flatten();
        let low = quote.low.get(i).copied().flatten();
        let close = quote.close.get(i).copied().flatten();
        let volume = quote.volume.get(i).copied().flatten();

        // Holidays come back as all-null rows.
        if open.is_none() && high.is_none() && low.is_none() && close.is_none() && volume.is_none()
        {
            continue;
        }

        let stamp = DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| {
                ProviderError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
            })?
            .with_timezone(&offset)
            .to_rfc3339();

        rows.push(vec![
            Value::from(stamp),
            price(open),
            price(high),
            price(low),
            price(close),
            volume.map_or(Value::Null, Value::from),
        ]);
    }

    Ok(HistoricalResponse::ok(rows))
}

fn price(v: Option<f64>) -> Value {
    v.and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "RELIANCE.NS", "gmtoffset": 19800},
                "timestamp": [1704166200, 1704252600, 1704339000],
                "indicators": {"quote": [{
                    "open":   [2600.0, null, 2610.5],
                    "high":   [2620.0, null, 2630.0],
                    "low":    [2590.0, null, 2601.0],
                    "close":  [2615.0, null, 2625.0],
                    "volume": [1200000, null, null]
                }]}
            }],
            "error": null
        }
    }"#;

    #[test]
    fn rows_carry_exchange_local_offset() {
        let resp = parse_chart(BODY).unwrap();
        assert!(resp.status);
        let rows = resp.data.unwrap();
        // middle row is all-null and skipped
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::from("2024-01-02T09:00:00+05:30"));
        assert_eq!(rows[0][4], Value::from(2615.0));
        assert_eq!(rows[1][5], Value::Null);
    }

    #[test]
    fn chart_error_becomes_failed_envelope() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let resp = parse_chart(body).unwrap();
        assert!(!resp.status);
        assert_eq!(resp.error_code.as_deref(), Some("Not Found"));
        assert!(resp.into_rows().is_none());
    }

    #[test]
    fn range_without_trading_days_is_empty_success() {
        let body = r#"{"chart":{"result":[{"meta":{"gmtoffset":0},"indicators":{"quote":[{}]}}],"error":null}}"#;
        // quote object without arrays no longer matches the layout
        assert!(parse_chart(body).is_err());

        let body = r#"{"chart":{"result":[{"meta":{"gmtoffset":0},"indicators":{"quote":[]}}],"error":null}}"#;
        let resp = parse_chart(body).unwrap();
        assert!(resp.status);
        assert_eq!(resp.row_count(), 0);
    }

    #[test]
    fn garbage_body_is_format_change() {
        assert!(matches!(
            parse_chart("<html>blocked</html>"),
            Err(ProviderError::ResponseFormatChanged(_))
        ));
    }

    #[test]
    fn chart_url_covers_whole_days() {
        let provider = YahooProvider::new(Arc::new(CircuitBreaker::default_provider()))
            .unwrap()
            .with_interval("1h")
            .with_base_url("http://localhost:9/chart/");
        let url = provider.chart_url(
            "ABC",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        assert_eq!(
            url,
            "http://localhost:9/chart/ABC?period1=1704067200&period2=1704153599&interval=1h"
        );
    }
}
