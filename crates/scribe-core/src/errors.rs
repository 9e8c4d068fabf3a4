use std::time::Duration;

use crate::model::ErrorKind;

/// Typed error hierarchy for provider calls. The adapter is the only
/// component that sees provider status codes; everything downstream works
/// from this classification.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    // Fatal, never retried
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("invalid audio: {0}")]
    InvalidAudio(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),

    // Operational
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,

    /// Anything unrecognized. Treated as non-transient so real defects are
    /// not masked as retryable.
    #[error("unknown provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::NetworkError(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed(_) | Self::InvalidAudio(_) | Self::QuotaExceeded(_)
        )
    }

    /// Server-suggested delay before the next attempt, when one was given.
    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Stable classification recorded on the job. `None` only for
    /// `Cancelled`, which is a status transition rather than a failure.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::AuthFailed(_) => Some(ErrorKind::AuthError),
            Self::InvalidAudio(_) => Some(ErrorKind::InvalidAudio),
            Self::QuotaExceeded(_) => Some(ErrorKind::QuotaExceeded),
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::NetworkError(_) => {
                Some(ErrorKind::Transient)
            }
            Self::Timeout(_) => Some(ErrorKind::Timeout),
            Self::Unknown(_) => Some(ErrorKind::Unknown),
            Self::Cancelled => None,
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::AuthFailed(body),
            400 | 415 => Self::InvalidAudio(body),
            402 => Self::QuotaExceeded(body),
            408 => Self::NetworkError(format!("request timeout: {body}")),
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::ServerError { status, body },
            _ => Self::Unknown(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::ServerError { status: 500, body: "err".into() }.is_retryable());
        assert!(ProviderError::NetworkError("tcp reset".into()).is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(ProviderError::AuthFailed("bad key".into()).is_fatal());
        assert!(ProviderError::InvalidAudio("not audio".into()).is_fatal());
        assert!(ProviderError::QuotaExceeded("monthly cap".into()).is_fatal());
    }

    #[test]
    fn unknown_is_not_retryable() {
        let err = ProviderError::Unknown("weird response".into());
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
        assert_eq!(err.error_kind(), Some(ErrorKind::Unknown));
    }

    #[test]
    fn timeout_and_cancelled_not_retryable() {
        let timeout = ProviderError::Timeout(Duration::from_secs(3600));
        assert!(!timeout.is_retryable());
        assert_eq!(timeout.error_kind(), Some(ErrorKind::Timeout));

        let cancelled = ProviderError::Cancelled;
        assert!(!cancelled.is_retryable());
        assert_eq!(cancelled.error_kind(), None);
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(rl.suggested_delay(), Some(Duration::from_secs(5)));

        let se = ProviderError::ServerError { status: 500, body: "err".into() };
        assert_eq!(se.suggested_delay(), None);
    }

    #[test]
    fn from_status_mapping() {
        assert!(ProviderError::from_status(401, "unauthorized".into(), None).is_fatal());
        assert!(ProviderError::from_status(403, "forbidden".into(), None).is_fatal());
        assert!(matches!(
            ProviderError::from_status(400, "bad media".into(), None),
            ProviderError::InvalidAudio(_)
        ));
        assert!(matches!(
            ProviderError::from_status(415, "unsupported".into(), None),
            ProviderError::InvalidAudio(_)
        ));
        assert!(matches!(
            ProviderError::from_status(402, "quota".into(), None),
            ProviderError::QuotaExceeded(_)
        ));
        assert!(ProviderError::from_status(429, "slow down".into(), None).is_retryable());
        assert!(ProviderError::from_status(500, "internal".into(), None).is_retryable());
        assert!(ProviderError::from_status(503, "unavailable".into(), None).is_retryable());
        assert!(ProviderError::from_status(408, "timeout".into(), None).is_retryable());
        assert!(matches!(
            ProviderError::from_status(418, "teapot".into(), None),
            ProviderError::Unknown(_)
        ));
    }

    #[test]
    fn from_status_carries_retry_after() {
        let err = ProviderError::from_status(429, "".into(), Some(Duration::from_secs(9)));
        assert_eq!(err.suggested_delay(), Some(Duration::from_secs(9)));
    }

    #[test]
    fn error_kind_mapping() {
        assert_eq!(
            ProviderError::NetworkError("x".into()).error_kind(),
            Some(ErrorKind::Transient)
        );
        assert_eq!(
            ProviderError::AuthFailed("x".into()).error_kind(),
            Some(ErrorKind::AuthError)
        );
        assert_eq!(
            ProviderError::QuotaExceeded("x".into()).error_kind(),
            Some(ErrorKind::QuotaExceeded)
        );
    }
}
