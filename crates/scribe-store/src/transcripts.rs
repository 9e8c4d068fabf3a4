use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::instrument;

use scribe_core::{JobId, Segment, Speaker, Transcript};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, get_opt};

/// Repository for normalized transcripts. A transcript row exists only for
/// completed jobs; writing one and completing the job is a single
/// transaction so no observer ever sees a completed job without its
/// transcript (or the reverse).
#[derive(Clone)]
pub struct TranscriptRepo {
    db: Database,
}

struct TranscriptHead {
    raw_payload: String,
    confidence_score: f64,
    language_detected: String,
    processing_duration_seconds: f64,
}

impl TranscriptRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Atomically flip the job `processing -> completed` and persist its
    /// transcript. If the job lost a status race in the meantime (for
    /// example a cancel landed first) nothing is written and the caller
    /// gets `StaleTransition`.
    #[instrument(skip(self, transcript))]
    pub fn insert_completing(
        &self,
        id: &JobId,
        transcript: &Transcript,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&transcript.raw_provider_payload)?;
        let completed_at = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| {
            let affected = tx.execute(
                "UPDATE jobs SET status = 'completed', progress = 100, completed_at = ?1, \
                 processing_phase = NULL, estimated_completion = NULL \
                 WHERE id = ?2 AND status = 'processing'",
                params![completed_at, id.as_str()],
            )?;
            if affected == 0 {
                return Err(StoreError::StaleTransition(format!(
                    "job {id}: no longer processing at completion"
                )));
            }
            tx.execute(
                "INSERT INTO transcripts (job_id, raw_payload, confidence_score, \
                 language_detected, processing_duration_seconds) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    raw,
                    transcript.confidence_score,
                    transcript.language_detected,
                    transcript.processing_duration_seconds,
                ],
            )?;
            for speaker in &transcript.speakers {
                tx.execute(
                    "INSERT INTO speakers (job_id, speaker_id, label, total_speaking_seconds, \
                     segment_count) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        id.as_str(),
                        speaker.speaker_id as i64,
                        speaker.label,
                        speaker.total_speaking_seconds,
                        speaker.segment_count as i64,
                    ],
                )?;
            }
            for segment in &transcript.segments {
                tx.execute(
                    "INSERT INTO segments (job_id, ord, speaker_id, start_time, end_time, \
                     text, confidence) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        id.as_str(),
                        segment.order as i64,
                        segment.speaker_id as i64,
                        segment.start_time,
                        segment.end_time,
                        segment.text,
                        segment.confidence,
                    ],
                )?;
            }
            Ok(())
        })
    }

    pub fn get(&self, id: &JobId) -> Result<Transcript, StoreError> {
        self.db.with_conn(|conn| {
            let head = conn
                .query_row(
                    "SELECT raw_payload, confidence_score, language_detected, \
                     processing_duration_seconds FROM transcripts WHERE job_id = ?1",
                    params![id.as_str()],
                    |row| Ok(row_to_head(row)),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("transcript for job {id}")))??;

            let mut stmt = conn.prepare(
                "SELECT speaker_id, label, total_speaking_seconds, segment_count \
                 FROM speakers WHERE job_id = ?1 ORDER BY speaker_id",
            )?;
            let speaker_rows =
                stmt.query_map(params![id.as_str()], |row| Ok(row_to_speaker(row)))?;
            let mut speakers = Vec::new();
            for row in speaker_rows {
                speakers.push(row??);
            }

            let mut stmt = conn.prepare(
                "SELECT ord, speaker_id, start_time, end_time, text, confidence \
                 FROM segments WHERE job_id = ?1 ORDER BY ord",
            )?;
            let segment_rows =
                stmt.query_map(params![id.as_str()], |row| Ok(row_to_segment(row)))?;
            let mut segments = Vec::new();
            for row in segment_rows {
                segments.push(row??);
            }

            Ok(Transcript {
                raw_provider_payload: serde_json::from_str(&head.raw_payload)?,
                speakers,
                segments,
                confidence_score: head.confidence_score,
                language_detected: head.language_detected,
                processing_duration_seconds: head.processing_duration_seconds,
            })
        })
    }
}

fn row_to_head(row: &Row<'_>) -> Result<TranscriptHead, StoreError> {
    const T: &str = "transcripts";
    Ok(TranscriptHead {
        raw_payload: get(row, T, "raw_payload")?,
        confidence_score: get(row, T, "confidence_score")?,
        language_detected: get(row, T, "language_detected")?,
        processing_duration_seconds: get(row, T, "processing_duration_seconds")?,
    })
}

fn row_to_speaker(row: &Row<'_>) -> Result<Speaker, StoreError> {
    const T: &str = "speakers";
    Ok(Speaker {
        speaker_id: get::<i64>(row, T, "speaker_id")? as u32,
        label: get(row, T, "label")?,
        total_speaking_seconds: get(row, T, "total_speaking_seconds")?,
        segment_count: get::<i64>(row, T, "segment_count")? as u32,
    })
}

fn row_to_segment(row: &Row<'_>) -> Result<Segment, StoreError> {
    const T: &str = "segments";
    Ok(Segment {
        order: get::<i64>(row, T, "ord")? as u32,
        speaker_id: get::<i64>(row, T, "speaker_id")? as u32,
        start_time: get_opt(row, T, "start_time")?,
        end_time: get_opt(row, T, "end_time")?,
        text: get(row, T, "text")?,
        confidence: get(row, T, "confidence")?,
    })
}
