//! Retry wrapper around a [`SpeechProvider`].
//!
//! Only errors classified retryable are retried; auth, bad-audio, and
//! quota failures surface immediately, as does `Unknown` so real defects
//! are not masked as flakiness. Cancellation is checked between attempts
//! and during backoff, never mid-call.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use scribe_core::{AudioRef, ProviderError, ProviderResult, SpeechProvider, TranscribeConfig};

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 disables jitter; 0.1 spreads delays by +/-10%.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next try once 1-based `attempt` has failed:
    /// `base * 2^(attempt - 1)`, capped, with optional jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp =
            self.base_delay.as_millis() as f64 * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let jittered = capped * (1.0 + self.jitter_factor * (jitter_unit() * 2.0 - 1.0));
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// A provider plus the policy for re-invoking it.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: SpeechProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Run the provider until success, a non-retryable error, or the
    /// attempt budget is spent. The error returned after exhaustion is
    /// the one from the final attempt.
    pub async fn transcribe(
        &self,
        audio: &AudioRef,
        config: &TranscribeConfig,
        cancel: &CancellationToken,
    ) -> Result<ProviderResult, ProviderError> {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            match self.inner.transcribe(audio, config).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempt >= self.policy.max_attempts {
                        return Err(e);
                    }
                    let delay = e
                        .suggested_delay()
                        .unwrap_or_else(|| self.policy.delay_for(attempt));
                    warn!(
                        provider = self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transcription attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Uniform value in `[0, 1)` from a thread-local xorshift64 state; avoids
/// pulling in a rand dependency for one jitter factor.
fn jitter_unit() -> f64 {
    use std::cell::Cell;
    use std::time::{SystemTime, UNIX_EPOCH};

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9e37_79b9_7f4a_7c15)
                | 1,
        );
    }
    STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        (x >> 11) as f64 / (1u64 << 53) as f64
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};

    fn audio() -> AudioRef {
        AudioRef::new("https://storage.example/audio/meeting.ogg")
    }

    fn net_failure() -> MockResponse {
        MockResponse::Failure(ProviderError::NetworkError("connection reset".into()))
    }

    fn success() -> MockResponse {
        MockResponse::Success(ProviderResult {
            raw: serde_json::json!({"chunks": []}),
            chunks: vec![],
            language: Some("en".into()),
            confidence: Some(0.9),
            truncated: false,
        })
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_two_transient_failures() {
        let provider = RetryingProvider::new(
            MockProvider::new(vec![net_failure(), net_failure(), success()]),
            RetryPolicy::default(),
        );
        let result = provider
            .transcribe(&audio(), &TranscribeConfig::default(), &CancellationToken::new())
            .await;
        assert!(result.is_ok());
        assert_eq!(provider.inner().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_exactly_three_transient_attempts() {
        let provider = RetryingProvider::new(
            MockProvider::new(vec![net_failure(), net_failure(), net_failure(), success()]),
            RetryPolicy::default(),
        );
        let err = provider
            .transcribe(&audio(), &TranscribeConfig::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NetworkError(_)));
        assert_eq!(provider.inner().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_error_fails_on_first_attempt() {
        let provider = RetryingProvider::new(
            MockProvider::new(vec![MockResponse::Failure(ProviderError::AuthFailed(
                "bad key".into(),
            ))]),
            RetryPolicy::default(),
        );
        let err = provider
            .transcribe(&audio(), &TranscribeConfig::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthFailed(_)));
        assert_eq!(provider.inner().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_error_is_not_retried() {
        let provider = RetryingProvider::new(
            MockProvider::new(vec![MockResponse::Failure(ProviderError::Unknown(
                "weird payload".into(),
            ))]),
            RetryPolicy::default(),
        );
        let err = provider
            .transcribe(&audio(), &TranscribeConfig::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unknown(_)));
        assert_eq!(provider.inner().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_totals_base_plus_double() {
        let provider = RetryingProvider::new(
            MockProvider::new(vec![net_failure(), net_failure(), success()]),
            RetryPolicy::default(),
        );
        let started = tokio::time::Instant::now();
        provider
            .transcribe(&audio(), &TranscribeConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_overrides_backoff() {
        let provider = RetryingProvider::new(
            MockProvider::new(vec![
                MockResponse::Failure(ProviderError::RateLimited {
                    retry_after: Some(Duration::from_secs(7)),
                }),
                success(),
            ]),
            RetryPolicy::default(),
        );
        let started = tokio::time::Instant::now();
        provider
            .transcribe(&audio(), &TranscribeConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_short_circuits_before_any_call() {
        let provider = RetryingProvider::new(
            MockProvider::new(vec![success()]),
            RetryPolicy::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider
            .transcribe(&audio(), &TranscribeConfig::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(provider.inner().calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let provider = std::sync::Arc::new(RetryingProvider::new(
            MockProvider::new(vec![net_failure(), success()]),
            RetryPolicy::default(),
        ));
        let cancel = CancellationToken::new();
        let task = {
            let provider = provider.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                provider
                    .transcribe(&audio(), &TranscribeConfig::default(), &cancel)
                    .await
            })
        };
        // Let the first attempt fail and the backoff sleep register.
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(provider.inner().calls(), 1);
    }
}
