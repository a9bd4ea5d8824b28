//! Shared plumbing every stage handler in this crate leans on: record
//! lookup by id, column access helpers, and the "referenced record is
//! gone" disposition every stage shares (spec §4.5's idempotence
//! contract, property 1 in spec §8).

use jacobine_core::error::{DatabaseError, NotFoundError, UsageError};
use jacobine_core::sql::SqlValue;
use jacobine_db::{Db, SqlRow, UsageOrDatabaseError};
use jacobine_runtime::Disposition;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug, Clone)]
pub enum StageError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
}

impl From<UsageOrDatabaseError> for StageError {
    fn from(e: UsageOrDatabaseError) -> Self {
        match e {
            UsageOrDatabaseError::Usage(u) => StageError::Usage(u),
            UsageOrDatabaseError::Database(d) => StageError::Database(d),
        }
    }
}

/// Load exactly one row by its surrogate key. Absent row is `NotFoundError`
/// — the message references vanished state and is poison (spec §4.5).
pub async fn load_row(
    db: &mut dyn Db,
    table: &str,
    id: i64,
) -> Result<SqlRow, StageError> {
    let mut predicate = BTreeMap::new();
    predicate.insert("id".to_string(), SqlValue::Int(id));
    let mut rows = db.select(table, &predicate, None, None, Some(1)).await?;
    rows.pop().ok_or_else(|| {
        StageError::NotFound(NotFoundError {
            table: table.to_string(),
            id: id.to_string(),
        })
    })
}

/// Parse an envelope's record-id string into the surrogate key type the
/// gateway expects. `None` on anything non-numeric — a poison envelope.
pub fn parse_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok()
}

pub fn get_bool(row: &SqlRow, column: &str) -> bool {
    matches!(row.get(column), Some(SqlValue::Bool(true)) | Some(SqlValue::Int(1)))
}

pub fn get_text<'a>(row: &'a SqlRow, column: &str) -> Option<&'a str> {
    match row.get(column) {
        Some(SqlValue::Text(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Log the failure and reject without requeue — the disposition every
/// `StageError` variant maps to per the error taxonomy (spec §7).
pub fn reject_on_error(stage: &str, err: &StageError) -> Disposition {
    error!(stage, error = %err, "stage failed, rejecting without requeue");
    Disposition::RejectNoRequeue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_rejects_non_numeric() {
        assert_eq!(parse_id("abc"), None);
        assert_eq!(parse_id("42"), Some(42));
    }

    #[test]
    fn get_bool_treats_int_one_as_true() {
        let mut row = SqlRow::new();
        row.insert("downloaded".to_string(), SqlValue::Int(1));
        assert!(get_bool(&row, "downloaded"));
        row.insert("downloaded".to_string(), SqlValue::Int(0));
        assert!(!get_bool(&row, "downloaded"));
    }

    #[test]
    fn get_text_ignores_non_text_columns() {
        let mut row = SqlRow::new();
        row.insert("url_tar".to_string(), SqlValue::Text("http://x".to_string()));
        row.insert("id".to_string(), SqlValue::Int(7));
        assert_eq!(get_text(&row, "url_tar"), Some("http://x"));
        assert_eq!(get_text(&row, "id"), None);
    }
}
