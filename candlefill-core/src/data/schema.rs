use crate::domain::CANDLE_COLUMNS;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Logical column type of a stored table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Timestamp,
    Float,
    UInt,
}

impl ColumnKind {
    pub fn dtype(self) -> DataType {
        match self {
            ColumnKind::Text => DataType::String,
            ColumnKind::Timestamp => DataType::Datetime(TimeUnit::Milliseconds, None),
            ColumnKind::Float => DataType::Float64,
            ColumnKind::UInt => DataType::UInt64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

/// Ordered column list of a candle table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// The canonical candle table: ticker, timestamp, open, high, low, close, volume.
    pub fn candles() -> Self {
        let columns = CANDLE_COLUMNS
            .iter()
            .map(|&name| ColumnDef {
                name: name.to_string(),
                kind: match name {
                    "ticker" => ColumnKind::Text,
                    "timestamp" => ColumnKind::Timestamp,
                    "volume" => ColumnKind::UInt,
                    _ => ColumnKind::Float,
                },
            })
            .collect();
        Self { columns }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Column names and dtypes as a polars schema.
    pub fn to_polars(&self) -> Schema {
        Schema::from_iter(
            self.columns
                .iter()
                .map(|c| Field::new(c.name.as_str().into(), c.kind.dtype())),
        )
    }

    /// Check a frame read back from disk: same columns, same order, same types.
    pub fn validate(&self, df: &DataFrame) -> Result<(), SchemaError> {
        let actual: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        if actual != self.column_names() {
            return Err(SchemaError::ColumnOrder {
                expected: self.column_names(),
                actual,
            });
        }

        for (name, expected) in self.to_polars().iter() {
            let actual_dtype = df
                .column(name.as_str())
                .map_err(|_| SchemaError::MissingColumn(name.to_string()))?
                .dtype();
            if actual_dtype != expected {
                return Err(SchemaError::TypeMismatch {
                    column: name.to_string(),
                    expected: expected.clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("column order mismatch: expected {expected:?}, got {actual:?}")]
    ColumnOrder {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}
