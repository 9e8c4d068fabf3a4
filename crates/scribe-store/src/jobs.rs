use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::instrument;

use scribe_core::{ErrorKind, Job, JobId, JobStatus};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, get_opt, parse_enum, parse_timestamp, parse_timestamp_opt};

/// Terminal jobs are kept this long before the sweeper marks them deleted.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Message recorded on jobs cancelled by a client.
pub const CANCELLED_MESSAGE: &str = "Processing cancelled by user";

const JOB_COLUMNS: &str = "id, file_name, file_size_bytes, audio_path, language, status, \
     progress, processing_phase, queue_position, estimated_completion, error_kind, \
     error_message, created_at, started_at, completed_at, expires_at";

/// Repository for job rows. Status changes are compare-and-swap: every
/// update names the status it expects, and a miss surfaces as
/// `StoreError::StaleTransition` rather than clobbering a concurrent
/// writer's result.
#[derive(Clone)]
pub struct JobRepo {
    db: Database,
}

impl JobRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new job in `uploaded` status with a default retention
    /// window of [`DEFAULT_TTL_HOURS`].
    #[instrument(skip(self))]
    pub fn create(
        &self,
        file_name: &str,
        file_size_bytes: u64,
        audio_path: Option<&str>,
        language: &str,
    ) -> Result<Job, StoreError> {
        let now = Utc::now();
        let job = Job {
            id: JobId::new(),
            file_name: file_name.to_string(),
            file_size_bytes,
            audio_path: audio_path.map(str::to_string),
            language: language.to_string(),
            status: JobStatus::Uploaded,
            progress: 0,
            processing_phase: None,
            queue_position: None,
            estimated_completion: None,
            error_kind: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            expires_at: now + Duration::hours(DEFAULT_TTL_HOURS),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (id, file_name, file_size_bytes, audio_path, language, \
                 status, progress, created_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    job.id.as_str(),
                    job.file_name,
                    job.file_size_bytes as i64,
                    job.audio_path,
                    job.language,
                    job.status.to_string(),
                    job.progress as i64,
                    job.created_at.to_rfc3339(),
                    job.expires_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        Ok(job)
    }

    pub fn get(&self, id: &JobId) -> Result<Job, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.as_str()],
                |row| Ok(row_to_job(row)),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?
        })
    }

    /// Compare-and-swap the job's status from `expected` to `next`,
    /// applying the bookkeeping each target state implies. Use
    /// [`mark_failed`](Self::mark_failed) and
    /// [`mark_cancelled`](Self::mark_cancelled) for the transitions that
    /// carry error details.
    #[instrument(skip(self))]
    pub fn cas_status(
        &self,
        id: &JobId,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<(), StoreError> {
        if !expected.can_transition_to(next) {
            return Err(StoreError::Conflict(format!(
                "illegal transition {expected} -> {next}"
            )));
        }
        let affected = self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let n = match next {
                JobStatus::Processing => conn.execute(
                    "UPDATE jobs SET status = ?1, started_at = ?2, queue_position = NULL \
                     WHERE id = ?3 AND status = ?4",
                    params![next.to_string(), now, id.as_str(), expected.to_string()],
                )?,
                JobStatus::Completed => conn.execute(
                    "UPDATE jobs SET status = ?1, completed_at = ?2, progress = 100, \
                     processing_phase = NULL, estimated_completion = NULL \
                     WHERE id = ?3 AND status = ?4",
                    params![next.to_string(), now, id.as_str(), expected.to_string()],
                )?,
                JobStatus::Failed | JobStatus::Cancelled => conn.execute(
                    "UPDATE jobs SET status = ?1, completed_at = ?2, processing_phase = NULL, \
                     estimated_completion = NULL, queue_position = NULL \
                     WHERE id = ?3 AND status = ?4",
                    params![next.to_string(), now, id.as_str(), expected.to_string()],
                )?,
                JobStatus::Deleted => conn.execute(
                    "UPDATE jobs SET status = ?1 WHERE id = ?2 AND status = ?3",
                    params![next.to_string(), id.as_str(), expected.to_string()],
                )?,
                // Unreachable behind the transition guard: no state
                // transitions back to uploaded.
                JobStatus::Uploaded => 0,
            };
            Ok(n)
        })?;
        if affected == 0 {
            return Err(self.stale_or_missing(id, expected));
        }
        Ok(())
    }

    /// `processing -> failed` with the error classification recorded.
    #[instrument(skip(self, message))]
    pub fn mark_failed(
        &self,
        id: &JobId,
        kind: ErrorKind,
        message: &str,
    ) -> Result<(), StoreError> {
        let affected = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET status = 'failed', error_kind = ?1, error_message = ?2, \
                 completed_at = ?3, processing_phase = NULL, estimated_completion = NULL, \
                 queue_position = NULL \
                 WHERE id = ?4 AND status = 'processing'",
                params![
                    kind.to_string(),
                    message,
                    Utc::now().to_rfc3339(),
                    id.as_str()
                ],
            )?)
        })?;
        if affected == 0 {
            return Err(self.stale_or_missing(id, JobStatus::Processing));
        }
        Ok(())
    }

    /// `uploaded|processing -> cancelled`. A job already past those states
    /// reports a stale transition; cancelling a finished job is a no-op
    /// the caller surfaces as such.
    #[instrument(skip(self))]
    pub fn mark_cancelled(&self, id: &JobId) -> Result<(), StoreError> {
        let affected = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET status = 'cancelled', error_message = ?1, completed_at = ?2, \
                 processing_phase = NULL, estimated_completion = NULL, queue_position = NULL \
                 WHERE id = ?3 AND status IN ('uploaded', 'processing')",
                params![CANCELLED_MESSAGE, Utc::now().to_rfc3339(), id.as_str()],
            )?)
        })?;
        if affected == 0 {
            let current = self.get(id)?;
            return Err(StoreError::StaleTransition(format!(
                "job {id}: expected a cancellable status, found {}",
                current.status
            )));
        }
        Ok(())
    }

    /// Update progress while the job is still processing. Writes that
    /// arrive after a status race or that would move progress backwards
    /// are dropped; returns whether the row changed.
    #[instrument(skip(self))]
    pub fn set_progress(
        &self,
        id: &JobId,
        progress: u8,
        phase: Option<&str>,
        estimated_completion: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let affected = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET progress = ?1, processing_phase = ?2, estimated_completion = ?3 \
                 WHERE id = ?4 AND status = 'processing' AND progress <= ?1",
                params![
                    progress as i64,
                    phase,
                    estimated_completion.map(|t| t.to_rfc3339()),
                    id.as_str()
                ],
            )?)
        })?;
        Ok(affected > 0)
    }

    /// Record the job's place in the pending queue. Only meaningful while
    /// the job is waiting; returns whether the row changed.
    pub fn set_queue_position(
        &self,
        id: &JobId,
        position: Option<u32>,
    ) -> Result<bool, StoreError> {
        let affected = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET queue_position = ?1 WHERE id = ?2 AND status = 'uploaded'",
                params![position.map(|p| p as i64), id.as_str()],
            )?)
        })?;
        Ok(affected > 0)
    }

    pub fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at"
            ))?;
            let rows = stmt.query_map(params![status.to_string()], |row| Ok(row_to_job(row)))?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row??);
            }
            Ok(jobs)
        })
    }

    pub fn count_by_status(&self, status: JobStatus) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE status = ?1",
                params![status.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
    }

    /// Terminal jobs whose retention window has lapsed as of `now`.
    pub fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs \
                 WHERE status IN ('completed', 'failed', 'cancelled') AND expires_at < ?1 \
                 ORDER BY expires_at"
            ))?;
            let rows = stmt.query_map(params![now.to_rfc3339()], |row| Ok(row_to_job(row)))?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row??);
            }
            Ok(jobs)
        })
    }

    /// Jobs still marked processing that started before `started_before`.
    /// These are orphans from a crashed worker or process restart.
    pub fn find_stuck(&self, started_before: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs \
                 WHERE status = 'processing' AND started_at IS NOT NULL AND started_at < ?1 \
                 ORDER BY started_at"
            ))?;
            let rows = stmt.query_map(params![started_before.to_rfc3339()], |row| {
                Ok(row_to_job(row))
            })?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row??);
            }
            Ok(jobs)
        })
    }

    fn stale_or_missing(&self, id: &JobId, expected: JobStatus) -> StoreError {
        match self.get(id) {
            Ok(job) => StoreError::StaleTransition(format!(
                "job {id}: expected {expected}, found {}",
                job.status
            )),
            Err(e) => e,
        }
    }
}

fn row_to_job(row: &Row<'_>) -> Result<Job, StoreError> {
    const T: &str = "jobs";
    let id: String = get(row, T, "id")?;
    let status_raw: String = get(row, T, "status")?;
    let error_kind_raw: Option<String> = get_opt(row, T, "error_kind")?;
    let created_raw: String = get(row, T, "created_at")?;
    let started_raw: Option<String> = get_opt(row, T, "started_at")?;
    let completed_raw: Option<String> = get_opt(row, T, "completed_at")?;
    let expires_raw: String = get(row, T, "expires_at")?;
    let estimated_raw: Option<String> = get_opt(row, T, "estimated_completion")?;
    Ok(Job {
        id: JobId::from_raw(id),
        file_name: get(row, T, "file_name")?,
        file_size_bytes: get::<i64>(row, T, "file_size_bytes")? as u64,
        audio_path: get_opt(row, T, "audio_path")?,
        language: get(row, T, "language")?,
        status: parse_enum(&status_raw, T, "status")?,
        progress: get::<i64>(row, T, "progress")? as u8,
        processing_phase: get_opt(row, T, "processing_phase")?,
        queue_position: get_opt::<i64>(row, T, "queue_position")?.map(|p| p as u32),
        estimated_completion: parse_timestamp_opt(estimated_raw.as_deref(), T, "estimated_completion")?,
        error_kind: error_kind_raw
            .map(|raw| parse_enum(&raw, T, "error_kind"))
            .transpose()?,
        error_message: get_opt(row, T, "error_message")?,
        created_at: parse_timestamp(&created_raw, T, "created_at")?,
        started_at: parse_timestamp_opt(started_raw.as_deref(), T, "started_at")?,
        completed_at: parse_timestamp_opt(completed_raw.as_deref(), T, "completed_at")?,
        expires_at: parse_timestamp(&expires_raw, T, "expires_at")?,
    })
}
