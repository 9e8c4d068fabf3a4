use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use scribe_core::events::StatusEvent;
use scribe_core::ids::JobId;
use scribe_core::model::JobStatus;
use scribe_store::{JobRepo, StoreError};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Phase names shown to clients while a job moves through the pipeline.
pub const PHASE_PREPROCESSING: &str = "preprocessing";
pub const PHASE_UPLOADING: &str = "uploading";
pub const PHASE_TRANSCRIBING: &str = "transcribing";
pub const PHASE_FINALIZING: &str = "finalizing";

/// Progress plateau on entering recognition and the cap it creeps toward
/// while the provider call is in flight.
pub const TRANSCRIBING_START: u8 = 30;
pub const TRANSCRIBING_CAP: u8 = 80;

const EVENT_CAPACITY: usize = 256;

/// Ceiling on per-job progress pushes. Transitions are exempt.
const MIN_PUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Progress within the transcribing phase, proportional to how much of
/// the projected processing time has elapsed. Capped below completion:
/// only the provider's actual answer moves a job past the cap.
pub fn creep_progress(elapsed: Duration, estimate: Duration) -> u8 {
    if estimate.is_zero() {
        return TRANSCRIBING_START;
    }
    let fraction = (elapsed.as_secs_f64() / estimate.as_secs_f64()).min(1.0);
    let span = f64::from(TRANSCRIBING_CAP - TRANSCRIBING_START);
    TRANSCRIBING_START + (fraction * span) as u8
}

/// Single fan-out point for job status. Every change is written to the
/// store first; push events are a best-effort mirror of that state, so a
/// subscriber that misses one can always resync from a snapshot.
pub struct StatusPublisher {
    jobs: JobRepo,
    tx: broadcast::Sender<StatusEvent>,
    last_push: DashMap<JobId, Instant>,
}

impl StatusPublisher {
    pub fn new(jobs: JobRepo) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs,
            tx,
            last_push: DashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Record forward progress and mirror it to subscribers, at most one
    /// push per [`MIN_PUSH_INTERVAL`] per job. Writes that lose a status
    /// race or would move progress backwards are dropped silently.
    pub fn publish_progress(
        &self,
        id: &JobId,
        progress: u8,
        phase: &str,
        estimated_completion: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let changed = self
            .jobs
            .set_progress(id, progress, Some(phase), estimated_completion)?;
        if !changed {
            return Ok(());
        }

        if let Some(last) = self.last_push.get(id) {
            if last.elapsed() < MIN_PUSH_INTERVAL {
                return Ok(());
            }
        }
        self.last_push.insert(id.clone(), Instant::now());
        self.push_view(id)
    }

    /// Mirror a status transition to subscribers. Never rate limited; a
    /// failed job additionally gets a `processing_error` event carrying
    /// the recovery suggestions for its error class.
    pub fn publish_transition(&self, id: &JobId) -> Result<(), StoreError> {
        let job = self.jobs.get(id)?;
        if job.status.is_terminal() {
            self.last_push.remove(id);
        }

        let view = job.status_view();
        let _ = self.tx.send(StatusEvent::JobStatusUpdate { view });

        if job.status == JobStatus::Failed {
            let suggested_actions = job
                .error_kind
                .map(|kind| {
                    kind.suggested_actions()
                        .into_iter()
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            let _ = self.tx.send(StatusEvent::ProcessingError {
                id: id.clone(),
                error_message: job
                    .error_message
                    .unwrap_or_else(|| "processing failed".into()),
                suggested_actions,
            });
        }
        Ok(())
    }

    /// Record and announce a queued job's place in line. Dropped if the
    /// job already left the queue.
    pub fn publish_queue_position(
        &self,
        id: &JobId,
        position: u32,
        estimated_wait: Duration,
    ) -> Result<(), StoreError> {
        let changed = self.jobs.set_queue_position(id, Some(position))?;
        if !changed {
            return Ok(());
        }
        let _ = self.tx.send(StatusEvent::QueuePositionUpdate {
            id: id.clone(),
            queue_position: position,
            estimated_wait_seconds: estimated_wait.as_secs(),
        });
        Ok(())
    }

    fn push_view(&self, id: &JobId) -> Result<(), StoreError> {
        let job = self.jobs.get(id)?;
        let _ = self.tx.send(StatusEvent::JobStatusUpdate {
            view: job.status_view(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::model::JobStatus;
    use scribe_store::Database;
    use tokio::sync::broadcast::error::TryRecvError;

    fn fixtures() -> (JobRepo, StatusPublisher) {
        let db = Database::in_memory().expect("open in-memory db");
        let jobs = JobRepo::new(db);
        let publisher = StatusPublisher::new(jobs.clone());
        (jobs, publisher)
    }

    fn processing_job(jobs: &JobRepo) -> JobId {
        let job = jobs
            .create("meeting.mp3", 4 * 1024 * 1024, Some("/tmp/a.mp3"), "auto")
            .expect("create");
        jobs.cas_status(&job.id, JobStatus::Uploaded, JobStatus::Processing)
            .expect("to processing");
        job.id
    }

    #[test]
    fn creep_starts_at_plateau() {
        assert_eq!(
            creep_progress(Duration::ZERO, Duration::from_secs(300)),
            30
        );
    }

    #[test]
    fn creep_is_proportional_to_estimate() {
        assert_eq!(
            creep_progress(Duration::from_secs(150), Duration::from_secs(300)),
            55
        );
    }

    #[test]
    fn creep_caps_when_estimate_overruns() {
        assert_eq!(
            creep_progress(Duration::from_secs(900), Duration::from_secs(300)),
            80
        );
    }

    #[tokio::test(start_paused = true)]
    async fn progress_pushes_are_rate_limited() {
        let (jobs, publisher) = fixtures();
        let id = processing_job(&jobs);
        let mut rx = publisher.subscribe();

        publisher
            .publish_progress(&id, 10, PHASE_PREPROCESSING, None)
            .expect("first push");
        assert!(matches!(
            rx.try_recv(),
            Ok(StatusEvent::JobStatusUpdate { view }) if view.progress == 10
        ));

        // Within the interval: stored, not pushed.
        publisher
            .publish_progress(&id, 20, PHASE_UPLOADING, None)
            .expect("suppressed push");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(jobs.get(&id).expect("get").progress, 20);

        tokio::time::advance(Duration::from_secs(2)).await;
        publisher
            .publish_progress(&id, 30, PHASE_TRANSCRIBING, None)
            .expect("push after interval");
        assert!(matches!(
            rx.try_recv(),
            Ok(StatusEvent::JobStatusUpdate { view }) if view.progress == 30
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn backwards_progress_is_dropped() {
        let (jobs, publisher) = fixtures();
        let id = processing_job(&jobs);
        jobs.set_progress(&id, 50, Some(PHASE_TRANSCRIBING), None)
            .expect("seed progress");
        let mut rx = publisher.subscribe();

        publisher
            .publish_progress(&id, 40, PHASE_TRANSCRIBING, None)
            .expect("regression");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(jobs.get(&id).expect("get").progress, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_bypass_the_rate_limit() {
        let (jobs, publisher) = fixtures();
        let id = processing_job(&jobs);
        let mut rx = publisher.subscribe();

        publisher
            .publish_progress(&id, 10, PHASE_PREPROCESSING, None)
            .expect("progress");
        let _ = rx.try_recv();

        jobs.mark_failed(&id, scribe_core::model::ErrorKind::Transient, "boom")
            .expect("fail");
        publisher.publish_transition(&id).expect("transition");

        assert!(matches!(
            rx.try_recv(),
            Ok(StatusEvent::JobStatusUpdate { view }) if view.status == JobStatus::Failed
        ));
    }

    #[tokio::test]
    async fn failed_jobs_also_emit_processing_error() {
        let (jobs, publisher) = fixtures();
        let id = processing_job(&jobs);
        jobs.mark_failed(&id, scribe_core::model::ErrorKind::InvalidAudio, "bad file")
            .expect("fail");
        let mut rx = publisher.subscribe();

        publisher.publish_transition(&id).expect("transition");

        assert!(matches!(
            rx.try_recv(),
            Ok(StatusEvent::JobStatusUpdate { .. })
        ));
        match rx.try_recv() {
            Ok(StatusEvent::ProcessingError {
                id: event_id,
                error_message,
                suggested_actions,
            }) => {
                assert_eq!(event_id, id);
                assert_eq!(error_message, "bad file");
                assert!(!suggested_actions.is_empty());
            }
            other => panic!("expected processing_error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn queue_position_events_carry_wait_estimate() {
        let (jobs, publisher) = fixtures();
        let job = jobs
            .create("queued.mp3", 1024, None, "auto")
            .expect("create");
        let mut rx = publisher.subscribe();

        publisher
            .publish_queue_position(&job.id, 2, Duration::from_secs(300))
            .expect("publish");

        match rx.try_recv() {
            Ok(StatusEvent::QueuePositionUpdate {
                id,
                queue_position,
                estimated_wait_seconds,
            }) => {
                assert_eq!(id, job.id);
                assert_eq!(queue_position, 2);
                assert_eq!(estimated_wait_seconds, 300);
            }
            other => panic!("expected queue_position_update, got {other:?}"),
        }
        assert_eq!(jobs.get(&job.id).expect("get").queue_position, Some(2));
    }

    #[tokio::test]
    async fn queue_position_dropped_once_job_left_the_queue() {
        let (jobs, publisher) = fixtures();
        let id = processing_job(&jobs);
        let mut rx = publisher.subscribe();

        publisher
            .publish_queue_position(&id, 1, Duration::from_secs(300))
            .expect("publish");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
