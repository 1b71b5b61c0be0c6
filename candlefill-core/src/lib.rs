//! candlefill core: incremental OHLCV ingestion.
//!
//! Per ticker the engine reads how far committed history reaches, walks
//! backward from today in bounded windows asking a provider for candles,
//! normalizes what comes back, and commits it to a store either in one write
//! or month by month.
//!
//! - `domain`: candles, tickers, fetch windows, batches
//! - `data`: provider port, Yahoo adapter, normalizer, table schema, universe
//! - `store`: store driver port, Parquet and in-memory drivers, watermark lookup
//! - `ingest`: backfill scheduler, partitioned committer, pacing, observer port

pub mod data;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::IngestError;
