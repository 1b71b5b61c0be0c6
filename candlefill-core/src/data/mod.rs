//! Upstream data: the provider port, the Yahoo adapter, raw-row normalization,
//! the stored table schema, and the ticker universe.

pub mod circuit_breaker;
pub mod normalize;
pub mod provider;
pub mod schema;
pub mod universe;
pub mod yahoo;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use normalize::{normalize, parse_timestamp, NormalizeError, NormalizedBatch};
pub use provider::{CandleProvider, HistoricalResponse, ProviderError, RawRow};
pub use schema::{ColumnDef, ColumnKind, SchemaError, TableSchema};
pub use universe::{Universe, UniverseError};
pub use yahoo::YahooProvider;
