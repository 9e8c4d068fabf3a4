//! Scripted provider double for orchestrator and retry tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use scribe_core::{AudioRef, ProviderError, ProviderResult, SpeechProvider, TranscribeConfig};

pub enum MockResponse {
    Success(ProviderResult),
    Failure(ProviderError),
}

/// Plays back a fixed script of responses, one per `transcribe` call, and
/// counts invocations. Calling past the end of the script is a test bug
/// and returns a loud `Unknown` error.
pub struct MockProvider {
    script: Mutex<VecDeque<MockResponse>>,
    calls: AtomicU32,
    delay: Option<std::time::Duration>,
}

impl MockProvider {
    pub fn new(script: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            delay: None,
        }
    }

    /// Same as [`new`](Self::new) but each call takes `delay` of (test)
    /// time before resolving, for timeout and cancellation scenarios.
    pub fn with_delay(script: Vec<MockResponse>, delay: std::time::Duration) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcribe(
        &self,
        _audio: &AudioRef,
        _config: &TranscribeConfig,
    ) -> Result<ProviderResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        match next {
            Some(MockResponse::Success(result)) => Ok(result),
            Some(MockResponse::Failure(err)) => Err(err),
            None => Err(ProviderError::Unknown("mock script exhausted".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_in_order() {
        let provider = MockProvider::new(vec![
            MockResponse::Failure(ProviderError::NetworkError("down".into())),
            MockResponse::Success(ProviderResult {
                raw: serde_json::json!({}),
                chunks: vec![],
                language: None,
                confidence: None,
                truncated: false,
            }),
        ]);
        let audio = AudioRef::new("file:///tmp/a.wav");
        let config = TranscribeConfig::default();
        assert!(provider.transcribe(&audio, &config).await.is_err());
        assert!(provider.transcribe(&audio, &config).await.is_ok());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_fails_loudly() {
        let provider = MockProvider::new(vec![]);
        let err = provider
            .transcribe(&AudioRef::new("file:///tmp/a.wav"), &TranscribeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unknown(_)));
    }
}
