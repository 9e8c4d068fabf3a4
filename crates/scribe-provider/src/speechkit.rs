//! Yandex SpeechKit adapter: submits a long-running recognition operation
//! and polls it to completion. This is the only module that knows
//! SpeechKit status codes and payload shapes; everything it returns is
//! already classified into [`ProviderError`] or normalized chunks.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use scribe_core::{
    AudioRef, ProviderChunk, ProviderError, ProviderResult, SpeechProvider, TranscribeConfig,
};

pub const DEFAULT_RECOGNIZE_URL: &str =
    "https://transcribe.api.cloud.yandex.net/speech/stt/v2/longRunningRecognize";
pub const DEFAULT_OPERATION_URL: &str = "https://operation.api.cloud.yandex.net/operations";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const START_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_TIMEOUT: Duration = Duration::from_secs(30);
const INITIAL_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Consecutive poll failures tolerated before the attempt is abandoned.
const MAX_POLL_FAILURES: u32 = 3;
const USER_AGENT: &str = concat!("scribe/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct SpeechKitConfig {
    pub api_key: SecretString,
    pub folder_id: String,
    pub recognize_url: String,
    pub operation_url: String,
    pub initial_poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl SpeechKitConfig {
    pub fn new(api_key: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            folder_id: folder_id.into(),
            recognize_url: DEFAULT_RECOGNIZE_URL.to_string(),
            operation_url: DEFAULT_OPERATION_URL.to_string(),
            initial_poll_interval: INITIAL_POLL_INTERVAL,
            max_poll_interval: MAX_POLL_INTERVAL,
        }
    }
}

pub struct SpeechKitProvider {
    client: reqwest::Client,
    config: SpeechKitConfig,
}

#[derive(Deserialize)]
struct OperationHandle {
    id: String,
}

#[derive(Deserialize)]
struct Operation {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OperationError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionResponse {
    #[serde(default)]
    chunks: Vec<RecognitionChunk>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionChunk {
    #[serde(default)]
    alternatives: Vec<Alternative>,
    /// Arrives as a JSON string in v2 payloads, occasionally a number.
    #[serde(default)]
    speaker_tag: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Alternative {
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Word {
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
}

impl SpeechKitProvider {
    pub fn new(config: SpeechKitConfig) -> Result<Self, ProviderError> {
        if config.api_key.expose_secret().is_empty() {
            return Err(ProviderError::AuthFailed("api key is required".into()));
        }
        if config.folder_id.is_empty() {
            return Err(ProviderError::AuthFailed("folder id is required".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::Unknown(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn start_recognition(
        &self,
        audio: &AudioRef,
        config: &TranscribeConfig,
    ) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "folderId": self.config.folder_id,
            "specification": {
                "languageCode": config.language,
                "model": config.model,
                "profanityFilter": false,
                "literatureText": true,
            },
            "recognitionConfig": {
                "enableSpeakerDiarization": config.enable_diarization,
                "maxSpeakerCount": 10,
                "enableAutomaticPunctuation": true,
            },
            "audio": {"uri": audio.uri},
        });
        let response = self
            .client
            .post(&self.config.recognize_url)
            .header("Authorization", auth_header(&self.config.api_key))
            .timeout(START_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let handle: OperationHandle = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("invalid start response: {e}")))?;
        debug!(operation = %handle.id, "recognition operation started");
        Ok(handle.id)
    }

    async fn poll_operation(&self, operation_id: &str) -> Result<Operation, ProviderError> {
        let response = self
            .client
            .get(format!("{}/{operation_id}", self.config.operation_url))
            .header("Authorization", auth_header(&self.config.api_key))
            .timeout(POLL_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("invalid operation response: {e}")))
    }

    /// Poll until the operation reports done, tolerating a few transient
    /// poll hiccups without abandoning the recognition in flight.
    async fn wait_for_operation(
        &self,
        operation_id: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut interval = self.config.initial_poll_interval;
        let mut consecutive_failures = 0u32;
        loop {
            match self.poll_operation(operation_id).await {
                Ok(op) if op.done => {
                    if let Some(error) = op.error {
                        return Err(classify_operation_error(error));
                    }
                    return op.response.ok_or_else(|| {
                        ProviderError::Unknown("operation finished without a response".into())
                    });
                }
                Ok(_) => {
                    consecutive_failures = 0;
                }
                Err(e) if e.is_retryable() && consecutive_failures + 1 < MAX_POLL_FAILURES => {
                    consecutive_failures += 1;
                    warn!(
                        operation = operation_id,
                        consecutive_failures,
                        error = %e,
                        "operation poll failed, will poll again"
                    );
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(interval).await;
            interval = Duration::from_secs_f64(
                (interval.as_secs_f64() * 1.2).min(self.config.max_poll_interval.as_secs_f64()),
            );
        }
    }
}

#[async_trait]
impl SpeechProvider for SpeechKitProvider {
    fn name(&self) -> &str {
        "yandex-speechkit"
    }

    #[instrument(skip(self, config), fields(uri = %audio.uri))]
    async fn transcribe(
        &self,
        audio: &AudioRef,
        config: &TranscribeConfig,
    ) -> Result<ProviderResult, ProviderError> {
        let operation_id = self.start_recognition(audio, config).await?;
        let raw = self.wait_for_operation(&operation_id).await?;
        decode_response(raw)
    }
}

fn auth_header(api_key: &SecretString) -> String {
    format!("Api-Key {}", api_key.expose_secret())
}

fn request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::NetworkError(format!("request timed out: {e}"))
    } else {
        ProviderError::NetworkError(e.to_string())
    }
}

async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    ProviderError::from_status(status, body, retry_after)
}

/// Map a finished operation's gRPC-style error code onto the provider
/// taxonomy. Unrecognized codes stay `Unknown` so they fail fast.
fn classify_operation_error(error: OperationError) -> ProviderError {
    match error.code {
        Some(3) => ProviderError::InvalidAudio(error.message),
        Some(7) | Some(16) => ProviderError::AuthFailed(error.message),
        Some(8) => ProviderError::QuotaExceeded(error.message),
        Some(13) | Some(14) => ProviderError::NetworkError(error.message),
        _ => ProviderError::Unknown(error.message),
    }
}

/// Turn the raw recognition payload into ordered provider chunks. The
/// payload itself travels along untouched for audit.
fn decode_response(raw: serde_json::Value) -> Result<ProviderResult, ProviderError> {
    let parsed: RecognitionResponse = serde_json::from_value(raw.clone())
        .map_err(|e| ProviderError::Unknown(format!("malformed recognition payload: {e}")))?;
    let mut chunks = Vec::new();
    for chunk in parsed.chunks {
        let Some(alternative) = chunk.alternatives.into_iter().next() else {
            continue;
        };
        let text = alternative.text.trim();
        if text.is_empty() {
            continue;
        }
        chunks.push(ProviderChunk {
            speaker_tag: chunk
                .speaker_tag
                .as_ref()
                .and_then(tag_to_u32)
                .unwrap_or(1),
            text: text.to_string(),
            start_seconds: alternative
                .words
                .first()
                .and_then(|w| w.start_time.as_deref())
                .and_then(parse_seconds),
            end_seconds: alternative
                .words
                .last()
                .and_then(|w| w.end_time.as_deref())
                .and_then(parse_seconds),
            confidence: alternative.confidence,
        });
    }
    Ok(ProviderResult {
        raw,
        chunks,
        language: None,
        confidence: None,
        truncated: false,
    })
}

/// Durations come back as decimal strings with an `s` suffix ("2.500s").
fn parse_seconds(raw: &str) -> Option<f64> {
    raw.strip_suffix('s').unwrap_or(raw).parse().ok()
}

fn tag_to_u32(value: &serde_json::Value) -> Option<u32> {
    value
        .as_u64()
        .map(|n| n as u32)
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
