//! The ingestion engine: backfill scheduling, commit, pacing, observation.

pub mod committer;
pub mod observer;
pub mod pacing;
pub mod scheduler;

pub use committer::{CommitMode, CommitReport, Committer, PartitionOutcome, PartitionReport};
pub use observer::{IngestObserver, NullObserver, TracingObserver};
pub use pacing::{Clock, FixedClock, FixedDelay, JitteredDelay, NoDelay, Pacer, SystemClock};
pub use scheduler::{
    plan_window, BackfillOutcome, BackfillScheduler, EmptyReason, SchedulerConfig, Termination,
    MAX_WINDOW_SPAN_DAYS,
};
