//! SQLite persistence for transcription jobs and their transcripts.
//!
//! One [`Database`] handle is shared across repositories; all status
//! mutations are compare-and-swap so concurrent writers (workers, the
//! cancel endpoint, the retention sweeper) cannot clobber each other.

pub mod database;
pub mod error;
pub mod jobs;
pub mod row_helpers;
pub mod schema;
pub mod transcripts;

pub use database::Database;
pub use error::StoreError;
pub use jobs::{JobRepo, CANCELLED_MESSAGE, DEFAULT_TTL_HOURS};
pub use transcripts::TranscriptRepo;
