//! SQLite schema for jobs and transcripts.

pub const SCHEMA_VERSION: i32 = 1;

/// Connection-level pragmas applied on open.
pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

/// All tables, created idempotently. Timestamps are RFC 3339 TEXT in UTC,
/// which keeps lexicographic comparison equivalent to chronological order.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id                   TEXT PRIMARY KEY,
    file_name            TEXT NOT NULL,
    file_size_bytes      INTEGER NOT NULL,
    audio_path           TEXT,
    language             TEXT NOT NULL DEFAULT 'auto',
    status               TEXT NOT NULL DEFAULT 'uploaded',
    progress             INTEGER NOT NULL DEFAULT 0,
    processing_phase     TEXT,
    queue_position       INTEGER,
    estimated_completion TEXT,
    error_kind           TEXT,
    error_message        TEXT,
    created_at           TEXT NOT NULL,
    started_at           TEXT,
    completed_at         TEXT,
    expires_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_expiry ON jobs(status, expires_at);

CREATE TABLE IF NOT EXISTS transcripts (
    job_id                       TEXT PRIMARY KEY REFERENCES jobs(id),
    raw_payload                  TEXT NOT NULL,
    confidence_score             REAL NOT NULL,
    language_detected            TEXT NOT NULL,
    processing_duration_seconds  REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS speakers (
    job_id                  TEXT NOT NULL REFERENCES transcripts(job_id),
    speaker_id              INTEGER NOT NULL,
    label                   TEXT NOT NULL,
    total_speaking_seconds  REAL NOT NULL,
    segment_count           INTEGER NOT NULL,
    PRIMARY KEY (job_id, speaker_id)
);

CREATE TABLE IF NOT EXISTS segments (
    job_id      TEXT NOT NULL REFERENCES transcripts(job_id),
    ord         INTEGER NOT NULL,
    speaker_id  INTEGER NOT NULL,
    start_time  REAL,
    end_time    REAL,
    text        TEXT NOT NULL,
    confidence  REAL NOT NULL,
    PRIMARY KEY (job_id, ord)
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);
"#;
