//! Local CSV batch source.
//!
//! One file per ticker, named `{SYMBOL}.csv`, with a header row naming the raw
//! columns (`timestamp,open,high,low,close,volume`, any order, case-insensitive).
//! Files are read lazily in groups so a large directory never sits in memory
//! all at once.

use candlefill_core::data::RawRow;
use candlefill_core::domain::RAW_COLUMNS;
use candlefill_core::ingest::IngestObserver;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("create source directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("list source directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("read {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

impl SourceError {
    fn file(path: &Path, reason: impl ToString) -> Self {
        SourceError::File {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Rows read from one CSV file.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBatch {
    /// File stem, used verbatim as the ticker symbol.
    pub ticker: String,
    pub path: PathBuf,
    pub rows: Vec<RawRow>,
}

pub struct CsvDirectorySource<'o> {
    dir: PathBuf,
    files: Vec<PathBuf>,
    group_size: usize,
    observer: &'o dyn IngestObserver,
}

impl<'o> CsvDirectorySource<'o> {
    /// List `*.csv` files in `dir`, creating the directory when it is missing.
    ///
    /// `group_size == 0` puts every file into a single group.
    pub fn open(
        dir: impl Into<PathBuf>,
        group_size: usize,
        observer: &'o dyn IngestObserver,
    ) -> Result<Self, SourceError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|source| SourceError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            info!(dir = %dir.display(), "created local source directory");
        }

        let entries = fs::read_dir(&dir).map_err(|source| SourceError::ReadDir {
            path: dir.clone(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        files.sort();
        info!(dir = %dir.display(), files = files.len(), "found local CSV files");

        Ok(Self {
            dir,
            files,
            group_size,
            observer,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn groups(&self) -> LocalGroups<'_> {
        let size = if self.group_size == 0 {
            self.files.len().max(1)
        } else {
            self.group_size
        };
        LocalGroups {
            chunks: self.files.chunks(size),
            index: 0,
            observer: self.observer,
        }
    }
}

/// Lazily reads one group of files per `next()`; groups where nothing could
/// be read are skipped.
pub struct LocalGroups<'a> {
    chunks: std::slice::Chunks<'a, PathBuf>,
    index: usize,
    observer: &'a dyn IngestObserver,
}

impl Iterator for LocalGroups<'_> {
    type Item = Vec<LocalBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        for chunk in self.chunks.by_ref() {
            self.index += 1;
            let mut group = Vec::with_capacity(chunk.len());
            for path in chunk {
                match read_csv_file(path) {
                    Ok(batch) => {
                        debug!(
                            ticker = %batch.ticker,
                            rows = batch.rows.len(),
                            "loaded local file"
                        );
                        group.push(batch);
                    }
                    Err(SourceError::File { reason, .. }) => {
                        self.observer.source_skipped(path, &reason)
                    }
                    Err(e) => self.observer.source_skipped(path, &e.to_string()),
                }
            }
            if group.is_empty() {
                debug!(group = self.index, "group yielded no readable files");
                continue;
            }
            return Some(group);
        }
        None
    }
}

/// Read one CSV file into raw rows in `RAW_COLUMNS` order.
///
/// Columns are located by header name; a headerless-looking file with exactly
/// six columns is taken positionally. Empty cells become `Null`.
pub fn read_csv_file(path: &Path) -> Result<LocalBatch, SourceError> {
    let ticker = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SourceError::file(path, "file name has no usable ticker stem"))?
        .to_string();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| SourceError::file(path, e))?;

    let headers = reader
        .headers()
        .map_err(|e| SourceError::file(path, e))?
        .clone();
    let indices = column_indices(&headers).map_err(|reason| SourceError::file(path, reason))?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| SourceError::file(path, format!("record {}: {e}", line + 1)))?;
        let row: RawRow = indices
            .iter()
            .map(|&i| match record.get(i) {
                Some(cell) if !cell.is_empty() => Value::String(cell.to_string()),
                _ => Value::Null,
            })
            .collect();
        rows.push(row);
    }

    Ok(LocalBatch {
        ticker,
        path: path.to_path_buf(),
        rows,
    })
}

fn column_indices(headers: &csv::StringRecord) -> Result<Vec<usize>, String> {
    let named: Vec<Option<usize>> = RAW_COLUMNS
        .iter()
        .map(|want| headers.iter().position(|h| h.eq_ignore_ascii_case(want)))
        .collect();
    if named.iter().all(Option::is_some) {
        return Ok(named.into_iter().flatten().collect());
    }
    if headers.len() == RAW_COLUMNS.len() {
        return Ok((0..RAW_COLUMNS.len()).collect());
    }
    let missing: Vec<&str> = RAW_COLUMNS
        .iter()
        .zip(&named)
        .filter(|(_, idx)| idx.is_none())
        .map(|(name, _)| *name)
        .collect();
    Err(format!("missing columns {missing:?}"))
}
