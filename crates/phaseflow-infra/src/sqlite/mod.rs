//! SQLite storage layer.
//!
//! Store implementations backed by SQLite with WAL mode and split
//! read/write connection pools. Plans and run states are kept as JSON
//! documents next to the few columns the queries filter or sort on.

pub mod checkpoint;
pub mod event_log;
pub mod plan;
pub mod pool;

pub use checkpoint::SqliteCheckpointStore;
pub use event_log::SqliteEventLog;
pub use plan::SqlitePlanStore;
pub use pool::{DatabasePool, database_url};

use chrono::{DateTime, SecondsFormat, Utc};
use phaseflow_types::error::RepositoryError;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Map a failed create-only insert to `Conflict`, anything else to `Query`.
fn insert_error(err: sqlx::Error, conflict: impl FnOnce() -> String) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(conflict())
        }
        _ => RepositoryError::Query(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_format_round_trips_and_sorts() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1);

        let a = format_datetime(&earlier);
        let b = format_datetime(&later);
        assert!(a < b);
        assert_eq!(parse_datetime(&a).unwrap(), earlier);
    }

    #[test]
    fn invalid_uuid_is_a_query_error() {
        assert!(matches!(parse_uuid("nope"), Err(RepositoryError::Query(_))));
    }
}
