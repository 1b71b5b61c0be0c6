//! Parquet store with Hive-style partitioning.
//!
//! Layout:
//!
//! ```text
//! {root}/{table}/_table.json                      column list
//! {root}/{table}/ticker={TICKER}/{YYYY-MM}.parquet one file per calendar month
//! {root}/{table}/ticker={TICKER}/meta.json         row counts, range, hashes
//! ```
//!
//! - Atomic writes (write to `.tmp`, rename into place)
//! - Inserts merge with the existing month file and de-duplicate on
//!   `(ticker, timestamp)`, newest row wins, so re-running a window never
//!   duplicates history
//! - The sidecar is written after the partitions it describes; a crash in
//!   between leaves it behind the data, never ahead of it
//! - Watermark comes from the sidecar, falling back to scanning the newest
//!   partition when the sidecar is missing or unreadable

use super::{StoreDriver, StoreError, TickerStats};
use crate::data::{ColumnKind, TableSchema};
use crate::domain::{Candle, MonthKey};
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_FILE: &str = "_table.json";
const META_FILE: &str = "meta.json";

/// Per-month entry in the ticker sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub rows: usize,
    pub first_timestamp: NaiveDateTime,
    pub last_timestamp: NaiveDateTime,
    /// BLAKE3 of the partition file bytes.
    pub data_hash: String,
}

/// Sidecar describing everything stored for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerMeta {
    pub ticker: String,
    pub row_count: usize,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
    pub partitions: BTreeMap<String, PartitionMeta>,
    pub updated_at: NaiveDateTime,
}

impl TickerMeta {
    fn empty(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            row_count: 0,
            first_timestamp: None,
            last_timestamp: None,
            partitions: BTreeMap::new(),
            updated_at: chrono::Local::now().naive_local(),
        }
    }

    fn refresh_totals(&mut self) {
        self.row_count = self.partitions.values().map(|p| p.rows).sum();
        self.first_timestamp = self.partitions.values().map(|p| p.first_timestamp).min();
        self.last_timestamp = self.partitions.values().map(|p| p.last_timestamp).max();
        self.updated_at = chrono::Local::now().naive_local();
    }
}

pub struct ParquetStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &str) -> Result<PathBuf, StoreError> {
        check_key(table)?;
        Ok(self.root.join(table))
    }

    fn schema_path(&self, table: &str) -> Result<PathBuf, StoreError> {
        Ok(self.table_dir(table)?.join(SCHEMA_FILE))
    }

    fn ticker_dir(&self, table: &str, ticker: &str) -> Result<PathBuf, StoreError> {
        check_key(ticker)?;
        Ok(self.table_dir(table)?.join(format!("ticker={ticker}")))
    }

    fn require_table(&self, table: &str) -> Result<(), StoreError> {
        if self.schema_path(table)?.is_file() {
            Ok(())
        } else {
            Err(StoreError::TableMissing(table.to_string()))
        }
    }

    /// Stored schema of `table`.
    pub fn schema(&self, table: &str) -> Result<TableSchema, StoreError> {
        let path = self.schema_path(table)?;
        if !path.is_file() {
            return Err(StoreError::TableMissing(table.to_string()));
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| StoreError::io(format!("read {}", path.display()), e))?;
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path,
            reason: e.to_string(),
        })
    }

    /// Tickers with a partition directory in `table`, sorted.
    pub fn tickers(&self, table: &str) -> Result<Vec<String>, StoreError> {
        self.require_table(table)?;
        let dir = self.table_dir(table)?;
        let entries =
            fs::read_dir(&dir).map_err(|e| StoreError::io(format!("read {}", dir.display()), e))?;
        let mut tickers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io("dir entry", e))?;
            if let Some(t) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("ticker="))
            {
                tickers.push(t.to_string());
            }
        }
        tickers.sort();
        Ok(tickers)
    }

    /// All stored rows of `ticker`, ascending by timestamp.
    pub fn load(&self, table: &str, ticker: &str) -> Result<Vec<Candle>, StoreError> {
        self.require_table(table)?;
        let mut rows = Vec::new();
        for path in self.partition_files(table, ticker)? {
            rows.extend(read_partition(&path)?);
        }
        rows.sort_by_key(|c| c.timestamp);
        Ok(rows)
    }

    /// Read the sidecar; `None` when missing or unreadable.
    pub fn meta(&self, table: &str, ticker: &str) -> Result<Option<TickerMeta>, StoreError> {
        let path = self.ticker_dir(table, ticker)?.join(META_FILE);
        let Ok(content) = fs::read_to_string(&path) else {
            return Ok(None);
        };
        match serde_json::from_str(&content) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable sidecar");
                Ok(None)
            }
        }
    }

    /// Partition files of `ticker`, ascending by month.
    fn partition_files(&self, table: &str, ticker: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.ticker_dir(table, ticker)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&dir).map_err(|e| StoreError::io(format!("read {}", dir.display()), e))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io("dir entry", e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
                files.push(path);
            }
        }
        // YYYY-MM file stems sort chronologically
        files.sort();
        Ok(files)
    }

    /// Rebuild the sidecar from the partition files on disk.
    fn scan_meta(&self, table: &str, ticker: &str) -> Result<TickerMeta, StoreError> {
        let mut meta = TickerMeta::empty(ticker);
        for path in self.partition_files(table, ticker)? {
            let rows = read_partition(&path)?;
            if let Some(entry) = partition_meta(&rows, &path)? {
                meta.partitions.insert(month_of(&path), entry);
            }
        }
        meta.refresh_totals();
        Ok(meta)
    }

    fn write_ticker(
        &self,
        table: &str,
        ticker: &str,
        months: BTreeMap<MonthKey, Vec<&Candle>>,
    ) -> Result<(), StoreError> {
        let dir = self.ticker_dir(table, ticker)?;
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("create {}", dir.display()), e))?;

        let mut meta = match self.meta(table, ticker)? {
            Some(meta) => meta,
            None => self.scan_meta(table, ticker)?,
        };

        for (month, rows) in months {
            let path = dir.join(format!("{month}.parquet"));
            let fresh = candles_to_frame(&rows)?;
            let existing = if path.is_file() {
                Some(read_frame(&path)?)
            } else {
                None
            };
            let mut merged = merge_frames(existing, fresh)?;
            write_atomic_parquet(&mut merged, &path)?;

            let merged_rows = frame_to_candles(&merged, &path)?;
            if let Some(entry) = partition_meta(&merged_rows, &path)? {
                meta.partitions.insert(month.to_string(), entry);
            }
        }

        meta.refresh_totals();
        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| StoreError::Serialization(format!("sidecar: {e}")))?;
        write_atomic_bytes(&dir.join(META_FILE), &json)
    }
}

impl StoreDriver for ParquetStore {
    fn name(&self) -> &str {
        "parquet"
    }

    fn latest_timestamp(
        &self,
        table: &str,
        ticker: &str,
    ) -> Result<Option<NaiveDateTime>, StoreError> {
        self.require_table(table)?;
        if let Some(meta) = self.meta(table, ticker)? {
            return Ok(meta.last_timestamp);
        }
        for path in self.partition_files(table, ticker)?.iter().rev() {
            let latest = read_partition(path)?.iter().map(|c| c.timestamp).max();
            if latest.is_some() {
                return Ok(latest);
            }
        }
        Ok(None)
    }

    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.schema(table)?.column_names())
    }

    fn insert(&self, table: &str, rows: &[Candle]) -> Result<usize, StoreError> {
        self.require_table(table)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut grouped: BTreeMap<&str, BTreeMap<MonthKey, Vec<&Candle>>> = BTreeMap::new();
        for row in rows {
            grouped
                .entry(row.ticker.as_str())
                .or_default()
                .entry(MonthKey::of(&row.timestamp))
                .or_default()
                .push(row);
        }
        for (ticker, months) in grouped {
            self.write_ticker(table, ticker, months)?;
        }
        Ok(rows.len())
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.schema_path(table)?.is_file())
    }

    fn create_table(&self, table: &str, schema: &TableSchema) -> Result<(), StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let path = self.schema_path(table)?;
        if path.is_file() {
            return Ok(());
        }
        let dir = self.table_dir(table)?;
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("create {}", dir.display()), e))?;
        let json = serde_json::to_vec_pretty(schema)
            .map_err(|e| StoreError::Serialization(format!("table schema: {e}")))?;
        write_atomic_bytes(&path, &json)
    }

    fn stats(&self, table: &str, ticker: &str) -> Result<Option<TickerStats>, StoreError> {
        self.require_table(table)?;
        let meta = match self.meta(table, ticker)? {
            Some(meta) => meta,
            None => self.scan_meta(table, ticker)?,
        };
        Ok(match (meta.first_timestamp, meta.last_timestamp) {
            (Some(first), Some(last)) if meta.row_count > 0 => Some(TickerStats {
                ticker: ticker.to_string(),
                rows: meta.row_count,
                first_timestamp: first,
                last_timestamp: last,
            }),
            _ => None,
        })
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn check_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0'])
        || key.starts_with('_');
    if bad {
        Err(StoreError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

fn month_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn parquet_err(context: &str) -> impl Fn(PolarsError) -> StoreError + '_ {
    move |e| StoreError::Parquet(format!("{context}: {e}"))
}

fn candles_to_frame(rows: &[&Candle]) -> Result<DataFrame, StoreError> {
    let tickers: Vec<&str> = rows.iter().map(|c| c.ticker.as_str()).collect();
    let stamps: Vec<i64> = rows
        .iter()
        .map(|c| c.timestamp.and_utc().timestamp_millis())
        .collect();
    let opens: Vec<f64> = rows.iter().map(|c| c.open).collect();
    let highs: Vec<f64> = rows.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = rows.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = rows.iter().map(|c| c.close).collect();
    let volumes: Vec<u64> = rows.iter().map(|c| c.volume).collect();

    let df = DataFrame::new(vec![
        Column::new("ticker".into(), tickers),
        Column::new("timestamp".into(), stamps)
            .cast(&ColumnKind::Timestamp.dtype())
            .map_err(parquet_err("timestamp cast"))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(parquet_err("dataframe creation"))?;
    TableSchema::candles()
        .validate(&df)
        .map_err(|e| StoreError::Parquet(format!("partition frame: {e}")))?;
    Ok(df)
}

/// Existing rows first, fresh rows last; `UniqueKeepStrategy::Last` then keeps
/// the fresh copy of any repeated `(ticker, timestamp)`.
fn merge_frames(existing: Option<DataFrame>, fresh: DataFrame) -> Result<DataFrame, StoreError> {
    let combined = match existing {
        Some(old) => polars::prelude::concat([old.lazy(), fresh.lazy()], UnionArgs::default())
            .map_err(parquet_err("concat partitions"))?,
        None => fresh.lazy(),
    };
    combined
        .unique_stable(
            Some(vec!["ticker".into(), "timestamp".into()]),
            UniqueKeepStrategy::Last,
        )
        .sort(
            ["timestamp"],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()
        .map_err(parquet_err("merge partitions"))
}

fn read_frame(path: &Path) -> Result<DataFrame, StoreError> {
    let file = fs::File::open(path)
        .map_err(|e| StoreError::io(format!("open {}", path.display()), e))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    TableSchema::candles()
        .validate(&df)
        .map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(df)
}

fn read_partition(path: &Path) -> Result<Vec<Candle>, StoreError> {
    let df = read_frame(path)?;
    frame_to_candles(&df, path)
}

fn frame_to_candles(df: &DataFrame, path: &Path) -> Result<Vec<Candle>, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let col = |name: &str| df.column(name).map_err(|e| corrupt(format!("{name}: {e}")));

    let tickers = col("ticker")?.str().map_err(|e| corrupt(e.to_string()))?;
    let stamps = col("timestamp")?
        .datetime()
        .map_err(|e| corrupt(e.to_string()))?;
    let opens = col("open")?.f64().map_err(|e| corrupt(e.to_string()))?;
    let highs = col("high")?.f64().map_err(|e| corrupt(e.to_string()))?;
    let lows = col("low")?.f64().map_err(|e| corrupt(e.to_string()))?;
    let closes = col("close")?.f64().map_err(|e| corrupt(e.to_string()))?;
    let volumes = col("volume")?.u64().map_err(|e| corrupt(e.to_string()))?;

    let n = df.height();
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let null = |name: &str| corrupt(format!("null {name} at row {i}"));
        let millis = stamps.get(i).ok_or_else(|| null("timestamp"))?;
        let timestamp = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| corrupt(format!("timestamp out of range at row {i}")))?
            .naive_utc();
        rows.push(Candle {
            ticker: tickers.get(i).ok_or_else(|| null("ticker"))?.to_string(),
            timestamp,
            open: opens.get(i).ok_or_else(|| null("open"))?,
            high: highs.get(i).ok_or_else(|| null("high"))?,
            low: lows.get(i).ok_or_else(|| null("low"))?,
            close: closes.get(i).ok_or_else(|| null("close"))?,
            volume: volumes.get(i).ok_or_else(|| null("volume"))?,
        });
    }
    Ok(rows)
}

fn partition_meta(rows: &[Candle], path: &Path) -> Result<Option<PartitionMeta>, StoreError> {
    let first = rows.iter().map(|c| c.timestamp).min();
    let last = rows.iter().map(|c| c.timestamp).max();
    let (Some(first_timestamp), Some(last_timestamp)) = (first, last) else {
        return Ok(None);
    };
    let bytes =
        fs::read(path).map_err(|e| StoreError::io(format!("hash {}", path.display()), e))?;
    Ok(Some(PartitionMeta {
        rows: rows.len(),
        first_timestamp,
        last_timestamp,
        data_hash: blake3::hash(&bytes).to_hex().to_string(),
    }))
}

fn write_atomic_parquet(df: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path)
        .map_err(|e| StoreError::io(format!("create {}", tmp_path.display()), e))?;
    if let Err(e) = ParquetWriter::new(file).finish(df) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::Parquet(format!("write parquet: {e}")));
    }
    rename_into_place(&tmp_path, path)
}

fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, bytes)
        .map_err(|e| StoreError::io(format!("write {}", tmp_path.display()), e))?;
    rename_into_place(&tmp_path, path)
}

fn rename_into_place(tmp_path: &Path, path: &Path) -> Result<(), StoreError> {
    fs::rename(tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(tmp_path);
        StoreError::io("atomic rename failed", e)
    })
}
