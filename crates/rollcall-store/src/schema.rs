use rusqlite::Connection;

/// Pragmas for a file-backed database. In-memory databases ignore WAL.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

pub fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS students (
  student_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  name_key TEXT NOT NULL,
  descriptors_json TEXT,
  photo_paths_json TEXT,
  model_version TEXT,
  status TEXT NOT NULL DEFAULT 'active',
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_students_name_key ON students(name_key);
CREATE INDEX IF NOT EXISTS idx_students_status ON students(status, created_at);

CREATE TABLE IF NOT EXISTS course_members (
  id INTEGER PRIMARY KEY,
  course_id TEXT NOT NULL,
  student_id TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'active',
  added_at TEXT NOT NULL,
  UNIQUE(course_id, student_id),
  FOREIGN KEY(student_id) REFERENCES students(student_id)
);

CREATE INDEX IF NOT EXISTS idx_course_members_course ON course_members(course_id, status);

CREATE TABLE IF NOT EXISTS attendance_sessions (
  id TEXT PRIMARY KEY,
  course_id TEXT NOT NULL,
  teacher_id TEXT,
  video_filename TEXT NOT NULL,
  total_frames INTEGER NOT NULL,
  present_count INTEGER NOT NULL,
  absent_count INTEGER NOT NULL,
  threshold REAL NOT NULL,
  processing_seconds REAL NOT NULL,
  processed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_course ON attendance_sessions(course_id, processed_at);
CREATE INDEX IF NOT EXISTS idx_sessions_teacher ON attendance_sessions(teacher_id, processed_at);

CREATE TABLE IF NOT EXISTS attendance_records (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL,
  student_id TEXT NOT NULL,
  student_name TEXT NOT NULL,
  is_present INTEGER NOT NULL,
  confidence REAL NOT NULL,
  frames_matched INTEGER NOT NULL,
  frames_total INTEGER NOT NULL,
  evidence_path TEXT,
  FOREIGN KEY(session_id) REFERENCES attendance_sessions(id)
);

CREATE INDEX IF NOT EXISTS idx_records_session ON attendance_records(session_id);
"#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('students', 'course_members', 'attendance_sessions', 'attendance_records')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }
}
