use crate::data::NormalizeError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors that abort one ticker's unit of work.
///
/// Provider failures are absent on purpose: an unsuccessful window is an
/// empty window, counted toward the stall limit.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("column mismatch: table has {actual:?}, batch has {expected:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("row tagged '{found}' in a batch for '{expected}'")]
    TickerMismatch { expected: String, found: String },
}

impl IngestError {
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(
            self,
            IngestError::SchemaMismatch { .. }
                | IngestError::Normalize(NormalizeError::SchemaMismatch { .. })
        )
    }
}
