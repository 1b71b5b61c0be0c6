//! Durable candle storage.
//!
//! The engine only talks to a [`StoreDriver`]; it never builds query text.
//! Two drivers ship with the crate: [`ParquetStore`] (Hive-partitioned Parquet
//! files on local disk) and [`MemoryStore`] (in-process, for tests).

pub mod memory;
pub mod parquet;
pub mod watermark;

pub use memory::MemoryStore;
pub use parquet::{ParquetStore, PartitionMeta, TickerMeta};
pub use watermark::{epoch_sentinel, Watermark, WatermarkStore};

use crate::data::TableSchema;
use crate::domain::Candle;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table '{0}' does not exist")]
    TableMissing(String),

    #[error("invalid table or ticker name: {0:?}")]
    InvalidKey(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("corrupt store file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Row count and time range stored for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerStats {
    pub ticker: String,
    pub rows: usize,
    pub first_timestamp: NaiveDateTime,
    pub last_timestamp: NaiveDateTime,
}

/// Typed operations the engine needs from an analytical store.
///
/// Implementations must be safe to share across threads; the engine itself
/// drives them from a single thread.
pub trait StoreDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Latest stored timestamp for `ticker`, `None` when it has no rows.
    ///
    /// Some analytical stores answer the epoch instead of `None`; callers go
    /// through [`WatermarkStore`] which recognizes that.
    fn latest_timestamp(
        &self,
        table: &str,
        ticker: &str,
    ) -> Result<Option<NaiveDateTime>, StoreError>;

    /// Column names of `table`, in stored order.
    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Append rows. Rows whose `(ticker, timestamp)` already exist replace the
    /// stored row. Returns the number of rows written.
    fn insert(&self, table: &str, rows: &[Candle]) -> Result<usize, StoreError>;

    fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    fn create_table(&self, table: &str, schema: &TableSchema) -> Result<(), StoreError>;

    /// Row count and range for `ticker`, `None` when it has no rows.
    fn stats(&self, table: &str, ticker: &str) -> Result<Option<TickerStats>, StoreError>;
}
