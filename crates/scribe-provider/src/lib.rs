//! Transcription provider adapters and the retry wrapper the
//! orchestrator drives them through.

pub mod mock;
pub mod retry;
pub mod speechkit;

pub use mock::{MockProvider, MockResponse};
pub use retry::{RetryPolicy, RetryingProvider};
pub use speechkit::{SpeechKitConfig, SpeechKitProvider};
