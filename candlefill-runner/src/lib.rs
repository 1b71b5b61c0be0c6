//! candlefill runner: configuration, the local CSV source, and the run
//! pipeline that drives the core engine over a whole ticker universe.

pub mod config;
pub mod local_source;
pub mod pipeline;

pub use config::{ConfigError, IngestConfig, SourceMode};
pub use local_source::{CsvDirectorySource, LocalBatch, LocalGroups, SourceError};
pub use pipeline::{IngestPipeline, PipelineSettings, RunSummary, TickerReport};
