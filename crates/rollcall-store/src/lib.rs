//! rollcall-store: SQLite persistence for enrollments and attendance.
//!
//! One [`Store`] wraps one connection. Evidence and enrollment images live
//! on disk next to the database, managed by [`EvidenceStore`].

pub mod attendance;
pub mod error;
pub mod evidence;
pub mod models;
pub mod schema;
pub mod students;

pub use error::{Result, StoreError};
pub use evidence::EvidenceStore;
pub use models::{
    normalize_name, AttendanceRecord, EnrollmentCheck, EnrollmentStatus, HistoryQuery, NewEnrollment, NewSession,
    SessionRecord, StudentRecord,
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(db_path)?;
        schema::apply_pragmas(&conn)?;
        schema::apply_schema(&conn)?;
        tracing::debug!(path = %db_path.display(), "database opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply_pragmas(&conn)?;
        schema::apply_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort lexically.
pub(crate) fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {s:?}: {e}")))
}
