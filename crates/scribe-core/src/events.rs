use serde::{Deserialize, Serialize};

use crate::ids::JobId;
use crate::model::JobStatusView;

/// Status events published by the orchestrator and fanned out to push
/// subscribers. Field names are camelCase on the wire; a polling client
/// reading `JobStatusView` sees the exact same shape as a push client
/// receiving `job_status_update`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatusEvent {
    #[serde(rename = "job_status_update")]
    JobStatusUpdate {
        #[serde(flatten)]
        view: JobStatusView,
    },

    #[serde(rename = "queue_position_update", rename_all = "camelCase")]
    QueuePositionUpdate {
        id: JobId,
        queue_position: u32,
        estimated_wait_seconds: u64,
    },

    #[serde(rename = "processing_error", rename_all = "camelCase")]
    ProcessingError {
        id: JobId,
        error_message: String,
        suggested_actions: Vec<String>,
    },
}

impl StatusEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::JobStatusUpdate { view } => &view.id,
            Self::QueuePositionUpdate { id, .. } => id,
            Self::ProcessingError { id, .. } => id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobStatusUpdate { .. } => "job_status_update",
            Self::QueuePositionUpdate { .. } => "queue_position_update",
            Self::ProcessingError { .. } => "processing_error",
        }
    }

    /// Progress-only updates are rate-limited; transitions and errors are
    /// always delivered.
    pub fn is_progress_update(&self) -> bool {
        matches!(self, Self::JobStatusUpdate { .. })
    }
}
