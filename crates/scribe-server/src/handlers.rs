//! REST handlers for job status, cancellation, and transcript export.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use scribe_core::{JobId, JobStatus, JobStatusView};
use scribe_engine::EngineError;
use scribe_export::{render, ExportError};
use scribe_store::StoreError;
use serde_json::json;

use crate::server::AppState;

/// Errors surfaced over HTTP with a JSON `{error}` body.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Conflict(m) => (StatusCode::CONFLICT, m),
            Self::Internal(m) => {
                tracing::error!(error = %m, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => Self::NotFound(m),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::MissingTimingData { .. } | ExportError::UnsupportedFormat(_) => {
                Self::BadRequest(e.to_string())
            }
            ExportError::Serialization(_) => Self::Internal(e.to_string()),
        }
    }
}

/// `GET /jobs/{id}`: the poll-side twin of the push events.
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    let id = JobId::from_raw(id);
    let job = state.jobs.get(&id)?;
    Ok(Json(job.status_view()))
}

/// `POST /jobs/{id}/cancel`. A `success: false` body means the job had
/// already reached a terminal status.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = JobId::from_raw(id);
    let success = state.orchestrator.cancel(&id).map_err(|e| match e {
        EngineError::Validation(message) => ApiError::NotFound(message),
        other => ApiError::Internal(other.to_string()),
    })?;
    Ok(Json(json!({ "success": success })))
}

/// `GET /jobs/{id}/export/{format}`: the transcript as a downloadable
/// attachment.
pub async fn export_transcript(
    State(state): State<AppState>,
    Path((id, raw_format)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let format = raw_format
        .parse::<scribe_export::ExportFormat>()
        .map_err(ApiError::from)?;
    let id = JobId::from_raw(id);

    let job = state.jobs.get(&id)?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::Conflict(format!(
            "job {id} is {}, no transcript to export",
            job.status
        )));
    }

    let transcript = state.transcripts.get(&id)?;
    let bytes = render(&transcript, format)?;

    let headers = [
        (header::CONTENT_TYPE, format.content_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{id}.{}\"", format.extension()),
        ),
    ];
    Ok((headers, bytes).into_response())
}

/// `GET /queue`: pipeline load at a glance.
pub async fn queue_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "queueDepth": state.orchestrator.queue_depth(),
        "activeJobs": state.orchestrator.active_count(),
    }))
}

/// `GET /health`: degraded when the store stops answering.
pub async fn health(State(state): State<AppState>) -> Response {
    match state.jobs.count_by_status(JobStatus::Processing) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "queueDepth": state.orchestrator.queue_depth(),
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_http_statuses() {
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Conflict("x".into()).into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Internal("x".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn store_not_found_becomes_404() {
        let api: ApiError = StoreError::NotFound("job gone".into()).into();
        assert!(matches!(api, ApiError::NotFound(_)));
    }

    #[test]
    fn missing_timing_becomes_400() {
        let api: ApiError = ExportError::MissingTimingData { order: 3 }.into();
        assert!(matches!(api, ApiError::BadRequest(_)));
    }
}
