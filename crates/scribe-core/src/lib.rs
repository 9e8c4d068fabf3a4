pub mod errors;
pub mod events;
pub mod ids;
pub mod model;
pub mod provider;

pub use errors::ProviderError;
pub use events::StatusEvent;
pub use ids::{ClientId, JobId};
pub use model::{ErrorKind, Job, JobStatus, JobStatusView, Segment, Speaker, Transcript};
pub use provider::{AudioRef, ProviderChunk, ProviderResult, SpeechProvider, TranscribeConfig};
