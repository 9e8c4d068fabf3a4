//! Row extraction helpers that turn rusqlite/parse failures into
//! `StoreError::CorruptRow` with enough context to find the bad row.

use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::error::StoreError;

pub fn get<T: rusqlite::types::FromSql>(
    row: &Row<'_>,
    table: &str,
    column: &str,
) -> Result<T, StoreError> {
    row.get(column).map_err(|e| StoreError::CorruptRow {
        table: table.to_string(),
        column: column.to_string(),
        detail: e.to_string(),
    })
}

pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &Row<'_>,
    table: &str,
    column: &str,
) -> Result<Option<T>, StoreError> {
    row.get(column).map_err(|e| StoreError::CorruptRow {
        table: table.to_string(),
        column: column.to_string(),
        detail: e.to_string(),
    })
}

pub fn parse_enum<T>(raw: &str, table: &str, column: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| StoreError::CorruptRow {
        table: table.to_string(),
        column: column.to_string(),
        detail: e.to_string(),
    })
}

pub fn parse_timestamp(raw: &str, table: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table: table.to_string(),
            column: column.to_string(),
            detail: e.to_string(),
        })
}

pub fn parse_timestamp_opt(
    raw: Option<&str>,
    table: &str,
    column: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|value| parse_timestamp(value, table, column))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timestamp_accepts_rfc3339() {
        let ts = parse_timestamp("2026-03-01T12:30:00+00:00", "jobs", "created_at").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-03-01T12:30:00+00:00");
    }

    #[test]
    fn parse_timestamp_reports_table_and_column() {
        let err = parse_timestamp("not-a-date", "jobs", "created_at").unwrap_err();
        match err {
            StoreError::CorruptRow { table, column, .. } => {
                assert_eq!(table, "jobs");
                assert_eq!(column, "created_at");
            }
            other => panic!("expected CorruptRow, got {other:?}"),
        }
    }

    #[test]
    fn parse_timestamp_opt_passes_none_through() {
        assert!(parse_timestamp_opt(None, "jobs", "started_at")
            .unwrap()
            .is_none());
    }
}
