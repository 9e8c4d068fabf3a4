use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use scribe_core::{
    AudioRef, ErrorKind, Job, JobId, JobStatus, ProviderError, SpeechProvider, TranscribeConfig,
};
use scribe_provider::{RetryPolicy, RetryingProvider};
use scribe_store::{JobRepo, StoreError, TranscriptRepo};
use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::EngineError;
use crate::estimate::{processing_estimate, queue_wait_estimate};
use crate::normalize::normalize;
use crate::progress::{
    creep_progress, StatusPublisher, PHASE_FINALIZING, PHASE_PREPROCESSING, PHASE_TRANSCRIBING,
    PHASE_UPLOADING, TRANSCRIBING_START,
};

/// Cadence of the in-flight progress creep while the provider call runs.
const PROGRESS_TICK: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Concurrent recognition jobs.
    pub workers: usize,
    /// Watchdog for one job end to end, provider retries included.
    pub job_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            job_timeout: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
        }
    }
}

/// How one claimed job ended. Failures here are job outcomes, not engine
/// errors; a discard means another writer (cancel, usually) owned the
/// final status and this worker's result was thrown away.
enum RunOutcome {
    Completed,
    Discarded(&'static str),
    Failed(ErrorKind, String),
}

/// Drives jobs from `uploaded` to a terminal status over a fixed pool of
/// workers. All state shared with the HTTP layer lives behind `Arc`; the
/// orchestrator itself is cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: JobRepo,
    transcripts: TranscriptRepo,
    provider: RetryingProvider<Arc<dyn SpeechProvider>>,
    publisher: Arc<StatusPublisher>,
    queue: Mutex<VecDeque<JobId>>,
    notify: Notify,
    active: DashMap<JobId, CancellationToken>,
    config: OrchestratorConfig,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        jobs: JobRepo,
        transcripts: TranscriptRepo,
        provider: Arc<dyn SpeechProvider>,
        publisher: Arc<StatusPublisher>,
        config: OrchestratorConfig,
    ) -> Self {
        let retry = config.retry.clone();
        Self {
            inner: Arc::new(Inner {
                jobs,
                transcripts,
                provider: RetryingProvider::new(provider, retry),
                publisher,
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                active: DashMap::new(),
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Re-queue jobs left `uploaded` by a previous run, then spawn the
    /// worker pool.
    pub fn start(&self) -> Result<(), EngineError> {
        let pending = self.inner.jobs.list_by_status(JobStatus::Uploaded)?;
        if !pending.is_empty() {
            info!(count = pending.len(), "re-queueing jobs pending at startup");
            let mut queue = self.inner.queue.lock();
            for job in &pending {
                if !queue.contains(&job.id) {
                    queue.push_back(job.id.clone());
                }
            }
        }
        for worker in 0..self.inner.config.workers {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.worker_loop(worker).await });
        }
        self.inner.notify.notify_one();
        self.inner.refresh_queue_positions();
        Ok(())
    }

    /// Put an `uploaded` job in line for a worker. Returns its 1-based
    /// queue position.
    #[instrument(skip(self))]
    pub fn enqueue(&self, id: &JobId) -> Result<u32, EngineError> {
        let job = self.inner.jobs.get(id).map_err(|e| match e {
            StoreError::NotFound(_) => EngineError::Validation(format!("job {id} not found")),
            other => EngineError::Store(other),
        })?;
        if job.status != JobStatus::Uploaded {
            return Err(EngineError::Validation(format!(
                "job {id} is {}, only uploaded jobs can be queued",
                job.status
            )));
        }

        let position = {
            let mut queue = self.inner.queue.lock();
            if queue.contains(id) {
                return Err(EngineError::Validation(format!("job {id} is already queued")));
            }
            queue.push_back(id.clone());
            queue.len() as u32
        };
        self.inner.notify.notify_one();

        let wait = queue_wait_estimate(position, self.inner.config.workers);
        if let Err(e) = self.inner.publisher.publish_queue_position(id, position, wait) {
            warn!(job_id = %id, error = %e, "could not record queue position");
        }
        Ok(position)
    }

    /// Cancel a job wherever it currently is. Queued jobs never run;
    /// in-flight jobs keep their provider call until the next checkpoint
    /// and the result is discarded. Returns false when the job already
    /// reached a terminal status.
    #[instrument(skip(self))]
    pub fn cancel(&self, id: &JobId) -> Result<bool, EngineError> {
        match self.inner.jobs.mark_cancelled(id) {
            Ok(()) => {}
            Err(StoreError::StaleTransition(detail)) => {
                debug!(job_id = %id, detail = %detail, "cancel after terminal status");
                return Ok(false);
            }
            Err(StoreError::NotFound(_)) => {
                return Err(EngineError::Validation(format!("job {id} not found")));
            }
            Err(e) => return Err(e.into()),
        }

        self.inner.queue.lock().retain(|queued| queued != id);
        if let Some((_, token)) = self.inner.active.remove(id) {
            token.cancel();
        }
        if let Err(e) = self.inner.publisher.publish_transition(id) {
            warn!(job_id = %id, error = %e, "could not announce cancellation");
        }
        self.inner.refresh_queue_positions();
        Ok(true)
    }

    pub fn queue_depth(&self) -> u32 {
        self.inner.queue.lock().len() as u32
    }

    pub fn active_count(&self) -> u32 {
        self.inner.active.len() as u32
    }

    /// Stop the workers after their current job. In-flight jobs left in
    /// `processing` are picked up by recovery on the next start.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }
}

impl Inner {
    async fn worker_loop(&self, worker: usize) {
        debug!(worker, "worker started");
        loop {
            if self.shutdown.is_cancelled() {
                debug!(worker, "worker stopping");
                return;
            }
            let next = self.queue.lock().pop_front();
            let Some(id) = next else {
                tokio::select! {
                    _ = self.notify.notified() => continue,
                    _ = self.shutdown.cancelled() => continue,
                }
            };
            // Pass the wakeup on so an idle peer picks up the rest.
            if !self.queue.lock().is_empty() {
                self.notify.notify_one();
            }
            self.refresh_queue_positions();
            self.process_one(&id).await;
        }
    }

    /// Claim and run a single job. Outcomes are recorded on the job row;
    /// nothing propagates past here.
    #[instrument(skip(self))]
    async fn process_one(&self, id: &JobId) {
        match self
            .jobs
            .cas_status(id, JobStatus::Uploaded, JobStatus::Processing)
        {
            Ok(()) => {}
            Err(StoreError::StaleTransition(detail)) => {
                debug!(detail = %detail, "job no longer pending, skipping");
                return;
            }
            Err(e) => {
                error!(error = %e, "could not claim job");
                return;
            }
        }
        if let Err(e) = self.publisher.publish_transition(id) {
            warn!(error = %e, "could not announce processing start");
        }
        let job = match self.jobs.get(id) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "claimed job vanished");
                return;
            }
        };

        let cancel = CancellationToken::new();
        self.active.insert(id.clone(), cancel.clone());
        let outcome =
            tokio::time::timeout(self.config.job_timeout, self.run_job(&job, &cancel)).await;
        self.active.remove(id);

        let resolved = match outcome {
            Err(_elapsed) => RunOutcome::Failed(
                ErrorKind::Timeout,
                format!(
                    "processing exceeded {}s",
                    self.config.job_timeout.as_secs()
                ),
            ),
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => {
                // Store trouble mid-job: leave the row for stuck-job
                // recovery rather than guess at its state.
                error!(error = %e, "job pipeline error");
                return;
            }
        };

        match resolved {
            RunOutcome::Completed => info!("job completed"),
            RunOutcome::Discarded(reason) => debug!(reason, "job result discarded"),
            RunOutcome::Failed(kind, message) => self.fail_job(id, kind, &message),
        }
    }

    /// The processing pipeline for one claimed job: staged checkpoints,
    /// the (retried) provider call with ETA-proportional progress creep,
    /// then normalization and atomic completion.
    #[instrument(skip_all, fields(job_id = %job.id))]
    async fn run_job(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let id = &job.id;
        self.publisher
            .publish_progress(id, 10, PHASE_PREPROCESSING, None)?;

        let Some(path) = job.audio_path.as_deref() else {
            return Ok(RunOutcome::Failed(
                ErrorKind::InvalidAudio,
                "upload has no stored audio".into(),
            ));
        };
        self.publisher
            .publish_progress(id, 20, PHASE_UPLOADING, None)?;

        let estimate = processing_estimate(job.file_size_bytes);
        let eta = Utc::now() + chrono::Duration::seconds(estimate.as_secs() as i64);
        self.publisher
            .publish_progress(id, TRANSCRIBING_START, PHASE_TRANSCRIBING, Some(eta))?;

        let audio = AudioRef::new(path);
        let request = TranscribeConfig {
            language: job.language.clone(),
            ..TranscribeConfig::default()
        };

        let started = Instant::now();
        let mut ticker = interval_at(started + PROGRESS_TICK, PROGRESS_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let call = self.provider.transcribe(&audio, &request, cancel);
        tokio::pin!(call);

        let result = loop {
            tokio::select! {
                result = &mut call => break result,
                _ = ticker.tick() => {
                    let crept = creep_progress(started.elapsed(), estimate);
                    self.publisher
                        .publish_progress(id, crept, PHASE_TRANSCRIBING, Some(eta))?;
                }
            }
        };

        match result {
            Ok(raw) => {
                if raw.truncated {
                    warn!("provider flagged the recognition as truncated");
                }
                self.publisher
                    .publish_progress(id, 90, PHASE_FINALIZING, None)?;
                let duration = started.elapsed().as_secs_f64();
                let transcript = match normalize(raw, &job.language, duration) {
                    Ok(transcript) => transcript,
                    Err(EngineError::EmptyResult) => {
                        return Ok(RunOutcome::Failed(
                            ErrorKind::InvalidAudio,
                            "recognition produced no usable segments".into(),
                        ));
                    }
                    Err(e) => return Err(e),
                };
                self.publisher
                    .publish_progress(id, 95, PHASE_FINALIZING, None)?;

                match self.transcripts.insert_completing(id, &transcript) {
                    Ok(()) => {
                        self.publisher.publish_transition(id)?;
                        Ok(RunOutcome::Completed)
                    }
                    Err(StoreError::StaleTransition(detail)) => {
                        debug!(detail = %detail, "completion lost a status race");
                        Ok(RunOutcome::Discarded("completion lost a status race"))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(ProviderError::Cancelled) => Ok(RunOutcome::Discarded("cancelled while waiting")),
            Err(e) => {
                let kind = e.error_kind().unwrap_or(ErrorKind::Unknown);
                Ok(RunOutcome::Failed(kind, e.to_string()))
            }
        }
    }

    fn fail_job(&self, id: &JobId, kind: ErrorKind, message: &str) {
        match self.jobs.mark_failed(id, kind, message) {
            Ok(()) => {
                if let Err(e) = self.publisher.publish_transition(id) {
                    warn!(job_id = %id, error = %e, "could not announce job failure");
                }
            }
            Err(StoreError::StaleTransition(detail)) => {
                debug!(job_id = %id, detail = %detail, "failure lost a status race");
            }
            Err(e) => error!(job_id = %id, error = %e, "could not record job failure"),
        }
    }

    /// Re-announce positions after the line moves.
    fn refresh_queue_positions(&self) {
        let snapshot: Vec<JobId> = self.queue.lock().iter().cloned().collect();
        for (index, id) in snapshot.iter().enumerate() {
            let position = index as u32 + 1;
            let wait = queue_wait_estimate(position, self.config.workers);
            if let Err(e) = self.publisher.publish_queue_position(id, position, wait) {
                warn!(job_id = %id, error = %e, "could not refresh queue position");
            }
        }
    }
}
