use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scribe_core::model::ErrorKind;
use scribe_core::{JobId, JobStatus};
use scribe_store::{JobRepo, StoreError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::progress::StatusPublisher;

#[derive(Clone, Debug)]
pub struct SweeperConfig {
    /// Cadence of the background pass.
    pub interval: Duration,
    /// How long a job may sit in `processing` before it is presumed
    /// orphaned by a crashed worker.
    pub stuck_after: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            stuck_after: Duration::from_secs(2 * 3600),
        }
    }
}

/// Background retention pass: removes expired jobs' audio artifacts and
/// tombstones the rows, and fails jobs orphaned mid-processing. Uses the
/// same CAS discipline as the workers, so racing a live writer is safe.
pub struct Sweeper {
    jobs: JobRepo,
    publisher: Arc<StatusPublisher>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(jobs: JobRepo, publisher: Arc<StatusPublisher>, config: SweeperConfig) -> Self {
        Self {
            jobs,
            publisher,
            config,
        }
    }

    /// One retention pass over jobs whose `expires_at` lies before `now`.
    /// Returns the jobs tombstoned this pass. A job whose audio cannot be
    /// removed keeps its status and is retried on the next pass.
    #[instrument(skip(self))]
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, StoreError> {
        let expired = self.jobs.find_expired(now)?;
        let mut deleted = Vec::new();
        for job in expired {
            if let Some(path) = job.audio_path.as_deref() {
                if !remove_artifact(Path::new(path)) {
                    warn!(job_id = %job.id, path, "audio artifact not removable, retrying next pass");
                    continue;
                }
            }
            match self.jobs.cas_status(&job.id, job.status, JobStatus::Deleted) {
                Ok(()) => deleted.push(job.id),
                Err(StoreError::StaleTransition(detail)) => {
                    debug!(job_id = %job.id, detail = %detail, "expired job changed status mid-sweep");
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "could not tombstone expired job"),
            }
        }
        if !deleted.is_empty() {
            info!(count = deleted.len(), "swept expired jobs");
        }
        Ok(deleted)
    }

    /// Fail jobs stuck in `processing` longer than the configured bound.
    /// Those rows belong to workers that died without writing an outcome.
    #[instrument(skip(self))]
    pub fn recover_stuck(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, StoreError> {
        let cutoff = now - chrono::Duration::seconds(self.config.stuck_after.as_secs() as i64);
        let stuck = self.jobs.find_stuck(cutoff)?;
        let mut recovered = Vec::new();
        for job in stuck {
            match self.jobs.mark_failed(
                &job.id,
                ErrorKind::Timeout,
                "processing stalled and was recovered",
            ) {
                Ok(()) => {
                    warn!(job_id = %job.id, started_at = ?job.started_at, "recovered stuck job");
                    if let Err(e) = self.publisher.publish_transition(&job.id) {
                        warn!(job_id = %job.id, error = %e, "could not announce recovery");
                    }
                    recovered.push(job.id);
                }
                Err(StoreError::StaleTransition(detail)) => {
                    debug!(job_id = %job.id, detail = %detail, "stuck job resolved itself");
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "could not recover stuck job"),
            }
        }
        Ok(recovered)
    }

    /// Run both passes on a timer until shutdown. The first pass fires
    /// immediately so a restart cleans up without waiting a full interval.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        if let Err(e) = self.sweep(now) {
                            warn!(error = %e, "retention sweep failed");
                        }
                        if let Err(e) = self.recover_stuck(now) {
                            warn!(error = %e, "stuck-job recovery failed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("sweeper stopping");
                        return;
                    }
                }
            }
        })
    }
}

/// True when the artifact is gone, whether we removed it or it never
/// existed.
fn remove_artifact(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::{JobStatus, StatusEvent, Transcript};
    use scribe_store::{Database, TranscriptRepo};

    struct Fixture {
        jobs: JobRepo,
        transcripts: TranscriptRepo,
        publisher: Arc<StatusPublisher>,
        sweeper: Sweeper,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().expect("open db");
        let jobs = JobRepo::new(db.clone());
        let transcripts = TranscriptRepo::new(db);
        let publisher = Arc::new(StatusPublisher::new(jobs.clone()));
        let sweeper = Sweeper::new(jobs.clone(), Arc::clone(&publisher), SweeperConfig::default());
        Fixture {
            jobs,
            transcripts,
            publisher,
            sweeper,
        }
    }

    fn temp_audio() -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("scribe-sweep-{}.wav", uuid::Uuid::now_v7()));
        std::fs::write(&path, b"RIFF").expect("write temp audio");
        path
    }

    fn minimal_transcript() -> Transcript {
        Transcript {
            raw_provider_payload: serde_json::json!({}),
            speakers: vec![],
            segments: vec![],
            confidence_score: 0.9,
            language_detected: "ru-RU".into(),
            processing_duration_seconds: 1.0,
        }
    }

    fn completed_job(f: &Fixture, audio_path: Option<&str>) -> JobId {
        let job = f
            .jobs
            .create("done.mp3", 1024, audio_path, "auto")
            .expect("create");
        f.jobs
            .cas_status(&job.id, JobStatus::Uploaded, JobStatus::Processing)
            .expect("claim");
        f.transcripts
            .insert_completing(&job.id, &minimal_transcript())
            .expect("complete");
        job.id
    }

    fn past_expiry() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(25)
    }

    #[test]
    fn sweeps_expired_completed_job() {
        let f = fixture();
        let audio = temp_audio();
        let id = completed_job(&f, audio.to_str());

        let deleted = f.sweeper.sweep(past_expiry()).expect("sweep");

        assert_eq!(deleted, vec![id.clone()]);
        assert!(!audio.exists());
        assert_eq!(f.jobs.get(&id).expect("get").status, JobStatus::Deleted);
    }

    #[test]
    fn sweep_leaves_unexpired_and_active_jobs_alone() {
        let f = fixture();
        let completed = completed_job(&f, None);
        let uploaded = f.jobs.create("new.mp3", 1024, None, "auto").expect("create").id;

        // Before anything expires: nothing to do.
        let deleted = f.sweeper.sweep(Utc::now()).expect("sweep");
        assert!(deleted.is_empty());

        // After expiry only terminal jobs go; the uploaded one survives
        // even though its retention window has passed.
        let deleted = f.sweeper.sweep(past_expiry()).expect("sweep");
        assert_eq!(deleted, vec![completed]);
        assert_eq!(
            f.jobs.get(&uploaded).expect("get").status,
            JobStatus::Uploaded
        );
    }

    #[test]
    fn missing_audio_file_does_not_block_deletion() {
        let f = fixture();
        let id = completed_job(&f, Some("/nonexistent/audio.wav"));

        let deleted = f.sweeper.sweep(past_expiry()).expect("sweep");
        assert_eq!(deleted, vec![id]);
    }

    #[test]
    fn unremovable_audio_defers_deletion() {
        let f = fixture();
        let dir = std::env::temp_dir().join(format!("scribe-sweep-dir-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir(&dir).expect("create dir");
        let id = completed_job(&f, dir.to_str());

        let deleted = f.sweeper.sweep(past_expiry()).expect("sweep");

        assert!(deleted.is_empty());
        assert_eq!(f.jobs.get(&id).expect("get").status, JobStatus::Completed);
        std::fs::remove_dir(&dir).expect("cleanup");
    }

    #[test]
    fn sweep_is_idempotent() {
        let f = fixture();
        completed_job(&f, None);

        let first = f.sweeper.sweep(past_expiry()).expect("first sweep");
        assert_eq!(first.len(), 1);
        let second = f.sweeper.sweep(past_expiry()).expect("second sweep");
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn recovers_stuck_processing_job() {
        let f = fixture();
        let job = f.jobs.create("stuck.mp3", 1024, None, "auto").expect("create");
        f.jobs
            .cas_status(&job.id, JobStatus::Uploaded, JobStatus::Processing)
            .expect("claim");
        let mut rx = f.publisher.subscribe();

        let recovered = f
            .sweeper
            .recover_stuck(Utc::now() + chrono::Duration::hours(3))
            .expect("recover");

        assert_eq!(recovered, vec![job.id.clone()]);
        let recovered_job = f.jobs.get(&job.id).expect("get");
        assert_eq!(recovered_job.status, JobStatus::Failed);
        assert_eq!(recovered_job.error_kind, Some(scribe_core::ErrorKind::Timeout));
        assert!(matches!(
            rx.try_recv(),
            Ok(StatusEvent::JobStatusUpdate { view }) if view.status == JobStatus::Failed
        ));
    }

    #[tokio::test]
    async fn fresh_processing_job_is_not_recovered() {
        let f = fixture();
        let job = f.jobs.create("busy.mp3", 1024, None, "auto").expect("create");
        f.jobs
            .cas_status(&job.id, JobStatus::Uploaded, JobStatus::Processing)
            .expect("claim");

        let recovered = f
            .sweeper
            .recover_stuck(Utc::now() + chrono::Duration::hours(1))
            .expect("recover");

        assert!(recovered.is_empty());
        assert_eq!(f.jobs.get(&job.id).expect("get").status, JobStatus::Processing);
    }
}
