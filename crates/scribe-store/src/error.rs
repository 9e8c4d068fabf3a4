use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A compare-and-set update found the row in a different status than
    /// expected. Losing a status race is a normal outcome, not a failure;
    /// callers drop the write and move on.
    #[error("stale transition: {0}")]
    StaleTransition(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: String,
        column: String,
        detail: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
