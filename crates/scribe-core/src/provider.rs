use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

/// Opaque reference to uploaded audio. The adapter decides how to resolve
/// it (local path, object-store URI).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioRef {
    pub uri: String,
}

impl AudioRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// Per-job recognition settings passed through to the provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscribeConfig {
    pub language: String,
    pub enable_diarization: bool,
    pub model: String,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            language: "auto".into(),
            enable_diarization: true,
            model: "general".into(),
        }
    }
}

/// Raw recognition output before normalization into a `Transcript`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderResult {
    /// Provider payload exactly as received, retained for audit.
    pub raw: serde_json::Value,
    pub chunks: Vec<ProviderChunk>,
    pub language: Option<String>,
    pub confidence: Option<f64>,
    /// Set when the provider flags the recognition as cut short.
    pub truncated: bool,
}

/// One recognized utterance attributed to a diarization speaker tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderChunk {
    pub speaker_tag: u32,
    pub text: String,
    pub start_seconds: Option<f64>,
    pub end_seconds: Option<f64>,
    pub confidence: Option<f64>,
}

/// Contract for the external speech-to-text service. Implementations own
/// all provider-specific knowledge, in particular the mapping of provider
/// failures onto the `ProviderError` classification.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(
        &self,
        audio: &AudioRef,
        config: &TranscribeConfig,
    ) -> Result<ProviderResult, ProviderError>;
}

#[async_trait]
impl<P: SpeechProvider + ?Sized> SpeechProvider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn transcribe(
        &self,
        audio: &AudioRef,
        config: &TranscribeConfig,
    ) -> Result<ProviderResult, ProviderError> {
        (**self).transcribe(audio, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcribe_config_defaults() {
        let config = TranscribeConfig::default();
        assert_eq!(config.language, "auto");
        assert!(config.enable_diarization);
        assert_eq!(config.model, "general");
    }

    #[test]
    fn audio_ref_holds_uri() {
        let audio = AudioRef::new("/var/uploads/job_1.wav");
        assert_eq!(audio.uri, "/var/uploads/job_1.wav");
    }
}
