use scribe_store::StoreError;
use thiserror::Error;

/// Failures surfaced by the orchestration layer to its callers. Provider
/// failures never appear here: they are recorded on the job row instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The provider finished without a single usable segment.
    #[error("recognition produced no usable segments")]
    EmptyResult,
}
