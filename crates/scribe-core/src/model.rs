use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::JobId;

/// Lifecycle states for a transcription job.
///
/// Edges: `Uploaded → Processing → {Completed, Failed}`,
/// `Uploaded|Processing → Cancelled`, any terminal state `→ Deleted`
/// (retention sweeper only). Every mutation goes through a compare-and-swap
/// against the expected current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Deleted,
}

impl JobStatus {
    /// True for states the retention sweeper may expire.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// True while the job can still be cancelled by a client.
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Uploaded | Self::Processing)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            Self::Uploaded => matches!(next, Self::Processing | Self::Cancelled),
            Self::Processing => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => matches!(next, Self::Deleted),
            Self::Deleted => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uploaded => write!(f, "uploaded"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(Self::Uploaded),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Stable error classification recorded on a failed job. Clients map these
/// to actionable messages; the raw provider text lives in `error_message`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    AuthError,
    InvalidAudio,
    QuotaExceeded,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// Client-facing hints published alongside `processing_error` events.
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::Transient => vec!["Retry the upload in a few minutes"],
            Self::AuthError => vec!["Contact support", "Check the service configuration"],
            Self::InvalidAudio => vec![
                "Re-export the file in a supported format (wav, mp3, flac, m4a, ogg)",
                "Check that the file is not empty or corrupted",
            ],
            Self::QuotaExceeded => vec!["Wait for the quota window to reset", "Contact support"],
            Self::Timeout => vec!["Try a shorter recording", "Retry the upload"],
            Self::Unknown => vec!["Retry the upload", "Contact support if the problem persists"],
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::AuthError => write!(f, "auth_error"),
            Self::InvalidAudio => write!(f, "invalid_audio"),
            Self::QuotaExceeded => write!(f, "quota_exceeded"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "auth_error" => Ok(Self::AuthError),
            "invalid_audio" => Ok(Self::InvalidAudio),
            "quota_exceeded" => Ok(Self::QuotaExceeded),
            "timeout" => Ok(Self::Timeout),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}

/// One audio-to-transcript processing request and its lifecycle state.
/// Owned exclusively by the job store; mutated only through CAS transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub audio_path: Option<String>,
    pub language: String,
    pub status: JobStatus,
    pub progress: u8,
    pub processing_phase: Option<String>,
    pub queue_position: Option<u32>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl Job {
    pub fn can_cancel(&self) -> bool {
        self.status.can_cancel()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// The transport-agnostic status shape served to both push and poll
    /// clients.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            processing_phase: self.processing_phase.clone(),
            queue_position: self.queue_position,
            estimated_completion: self.estimated_completion,
            can_cancel: self.can_cancel(),
            error_kind: self.error_kind,
            error_message: self.error_message.clone(),
        }
    }
}

/// Point-in-time view of a job's status. Identical shape for push events
/// and poll responses so client logic is transport-agnostic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
    pub can_cancel: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Normalized result of a completed job, 1:1 with a COMPLETED Job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    /// Opaque provider payload, retained for audit.
    pub raw_provider_payload: serde_json::Value,
    pub speakers: Vec<Speaker>,
    pub segments: Vec<Segment>,
    pub confidence_score: f64,
    pub language_detected: String,
    pub processing_duration_seconds: f64,
}

impl Transcript {
    pub fn speaker_label(&self, speaker_id: u32) -> Option<&str> {
        self.speakers
            .iter()
            .find(|s| s.speaker_id == speaker_id)
            .map(|s| s.label.as_str())
    }
}

/// A diarization-identified participant within a job's audio.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Speaker {
    pub speaker_id: u32,
    pub label: String,
    pub total_speaking_seconds: f64,
    pub segment_count: u32,
}

/// One timestamped, attributed span of transcript text. `order` is the
/// canonical sequence: contiguous, strictly increasing, assigned by the
/// normalizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub order: u32,
    pub speaker_id: u32,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub text: String,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: JobStatus) -> Job {
        Job {
            id: JobId::new(),
            file_name: "meeting.mp3".into(),
            file_size_bytes: 1024,
            audio_path: None,
            language: "auto".into(),
            status,
            progress: 0,
            processing_phase: None,
            queue_position: None,
            estimated_completion: None,
            error_kind: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            expires_at: Utc::now() + chrono::Duration::hours(24),
        }
    }

    #[test]
    fn transition_edges() {
        use JobStatus::*;
        assert!(Uploaded.can_transition_to(Processing));
        assert!(Uploaded.can_transition_to(Cancelled));
        assert!(!Uploaded.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Processing.can_transition_to(Uploaded));
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.can_transition_to(Deleted));
            assert!(!terminal.can_transition_to(Processing));
        }
        assert!(!Deleted.can_transition_to(Uploaded));
        assert!(!Deleted.can_transition_to(Deleted));
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Uploaded.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Deleted.is_terminal());
    }

    #[test]
    fn status_display_from_str_roundtrip() {
        use JobStatus::*;
        for status in [Uploaded, Processing, Completed, Failed, Cancelled, Deleted] {
            let s = status.to_string();
            let parsed: JobStatus = s.parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("UNKNOWN".parse::<JobStatus>().is_err());
    }

    #[test]
    fn error_kind_display_from_str_roundtrip() {
        use ErrorKind::*;
        for kind in [Transient, AuthError, InvalidAudio, QuotaExceeded, Timeout, Unknown] {
            let s = kind.to_string();
            let parsed: ErrorKind = s.parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn can_cancel_follows_status() {
        assert!(job(JobStatus::Uploaded).can_cancel());
        assert!(job(JobStatus::Processing).can_cancel());
        assert!(!job(JobStatus::Completed).can_cancel());
        assert!(!job(JobStatus::Cancelled).can_cancel());
    }

    #[test]
    fn status_view_mirrors_job() {
        let mut j = job(JobStatus::Processing);
        j.progress = 42;
        j.processing_phase = Some("transcribing".into());
        let view = j.status_view();
        assert_eq!(view.id, j.id);
        assert_eq!(view.status, JobStatus::Processing);
        assert_eq!(view.progress, 42);
        assert_eq!(view.processing_phase.as_deref(), Some("transcribing"));
        assert!(view.can_cancel);
    }

    #[test]
    fn status_view_camel_case_wire_shape() {
        let mut j = job(JobStatus::Failed);
        j.error_kind = Some(ErrorKind::Timeout);
        j.error_message = Some("took too long".into());
        let json = serde_json::to_value(j.status_view()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["errorKind"], "timeout");
        assert_eq!(json["errorMessage"], "took too long");
        assert_eq!(json["canCancel"], false);
        assert!(json.get("queuePosition").is_none());
    }

    #[test]
    fn transcript_speaker_label_lookup() {
        let t = Transcript {
            raw_provider_payload: serde_json::json!({}),
            speakers: vec![Speaker {
                speaker_id: 1,
                label: "Speaker 1".into(),
                total_speaking_seconds: 2.5,
                segment_count: 1,
            }],
            segments: vec![],
            confidence_score: 0.9,
            language_detected: "en".into(),
            processing_duration_seconds: 12.0,
        };
        assert_eq!(t.speaker_label(1), Some("Speaker 1"));
        assert_eq!(t.speaker_label(2), None);
    }

    #[test]
    fn expired_check() {
        let mut j = job(JobStatus::Completed);
        j.expires_at = Utc::now() - chrono::Duration::hours(1);
        assert!(j.is_expired(Utc::now()));
        j.expires_at = Utc::now() + chrono::Duration::hours(1);
        assert!(!j.is_expired(Utc::now()));
    }
}
