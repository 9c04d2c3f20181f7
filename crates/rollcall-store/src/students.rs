//! Enrollment records and course membership.

use crate::error::{Result, StoreError};
use crate::models::{normalize_name, EnrollmentCheck, EnrollmentStatus, NewEnrollment, StudentRecord};
use crate::{parse_timestamp, timestamp, Store};
use chrono::Utc;
use rollcall_core::{Descriptor, EnrolledIdentity, Roster};
use rusqlite::{params, OptionalExtension, Row};

const STUDENT_COLUMNS: &str =
    "student_id, name, descriptors_json, photo_paths_json, model_version, status, created_at, updated_at";

fn row_to_student(row: &Row<'_>) -> rusqlite::Result<RawStudent> {
    Ok(RawStudent {
        student_id: row.get(0)?,
        name: row.get(1)?,
        descriptors_json: row.get(2)?,
        photo_paths_json: row.get(3)?,
        model_version: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Row as stored; JSON and timestamps are decoded outside the rusqlite closure.
struct RawStudent {
    student_id: String,
    name: String,
    descriptors_json: Option<String>,
    photo_paths_json: Option<String>,
    model_version: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl RawStudent {
    fn decode(self) -> Result<StudentRecord> {
        let descriptors: Vec<Descriptor> = match self.descriptors_json.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };
        let photo_paths: Vec<String> = match self.photo_paths_json.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };
        let status = EnrollmentStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("student {}: status {:?}", self.student_id, self.status)))?;

        Ok(StudentRecord {
            student_id: self.student_id,
            name: self.name,
            descriptors,
            photo_paths,
            model_version: self.model_version,
            status,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

impl Store {
    /// Whether an active student already uses this id or (normalized) name.
    /// The id is checked first; a duplicate id short-circuits the name check.
    pub fn check_enrollment_exists(&self, student_id: &str, name: &str) -> Result<EnrollmentCheck> {
        let mut check = EnrollmentCheck::default();

        let id_taken: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM students WHERE student_id = ?1 AND status = 'active')",
            params![student_id.trim()],
            |r| r.get(0),
        )?;
        if id_taken {
            check.exists = true;
            check.duplicate_id = true;
            return Ok(check);
        }

        let name_taken: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM students WHERE name_key = ?1 AND status = 'active')",
            params![normalize_name(name)],
            |r| r.get(0),
        )?;
        if name_taken {
            check.exists = true;
            check.duplicate_name = true;
        }

        Ok(check)
    }

    /// Store a new active enrollment. A previously deleted student id is
    /// re-enrolled in place.
    pub fn create_enrollment(&mut self, new: &NewEnrollment) -> Result<StudentRecord> {
        let student_id = new.student_id.trim();
        let name = new.name.trim();
        if student_id.is_empty() {
            return Err(StoreError::Blank { field: "student_id" });
        }
        if name.is_empty() {
            return Err(StoreError::Blank { field: "name" });
        }
        // Validates descriptors the same way roster loading will.
        EnrolledIdentity::new(student_id, name, new.descriptors.clone())?;

        let check = self.check_enrollment_exists(student_id, name)?;
        if check.duplicate_id {
            return Err(StoreError::DuplicateStudent(student_id.to_string()));
        }
        if check.duplicate_name {
            return Err(StoreError::DuplicateName(name.to_string()));
        }

        let now = timestamp(Utc::now());
        let model_version = new.descriptors.first().and_then(|d| d.model_version.clone());
        self.conn.execute(
            "INSERT INTO students \
             (student_id, name, name_key, descriptors_json, photo_paths_json, model_version, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?7) \
             ON CONFLICT(student_id) DO UPDATE SET \
               name = excluded.name, name_key = excluded.name_key, \
               descriptors_json = excluded.descriptors_json, photo_paths_json = excluded.photo_paths_json, \
               model_version = excluded.model_version, status = 'active', \
               created_at = excluded.created_at, updated_at = excluded.updated_at",
            params![
                student_id,
                name,
                normalize_name(name),
                serde_json::to_string(&new.descriptors)?,
                serde_json::to_string(&new.photo_paths)?,
                model_version,
                now,
            ],
        )?;

        tracing::info!(student_id, descriptors = new.descriptors.len(), "student enrolled");
        self.get_student(student_id)?
            .ok_or_else(|| StoreError::StudentNotFound(student_id.to_string()))
    }

    /// Any student by id, including soft-deleted ones.
    pub fn get_student(&self, student_id: &str) -> Result<Option<StudentRecord>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = ?1"),
                params![student_id.trim()],
                row_to_student,
            )
            .optional()?;
        raw.map(RawStudent::decode).transpose()
    }

    /// Active students, newest first, optionally limited to one course.
    pub fn list_students(&self, course_id: Option<&str>, limit: usize, offset: usize) -> Result<Vec<StudentRecord>> {
        let raws = match course_id {
            Some(course) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM students s JOIN course_members m ON m.student_id = s.student_id \
                     WHERE m.course_id = ?1 AND m.status = 'active' AND s.status = 'active' \
                     ORDER BY s.created_at DESC, s.rowid DESC LIMIT ?2 OFFSET ?3",
                    prefixed_columns("s")
                ))?;
                let rows = stmt.query_map(params![course, limit as i64, offset as i64], row_to_student)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {STUDENT_COLUMNS} FROM students WHERE status = 'active' \
                     ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_student)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        raws.into_iter().map(RawStudent::decode).collect()
    }

    /// Soft delete: keeps the row, clears descriptors and photos.
    /// Returns false if no active student had this id.
    pub fn delete_student(&mut self, student_id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE students SET status = 'deleted', descriptors_json = NULL, photo_paths_json = NULL, \
             updated_at = ?2 WHERE student_id = ?1 AND status = 'active'",
            params![student_id.trim(), timestamp(Utc::now())],
        )?;
        if changed > 0 {
            tracing::info!(student_id, "student enrollment deleted");
        }
        Ok(changed > 0)
    }

    /// Add an active student to a course. Re-adding is a no-op.
    pub fn add_course_member(&mut self, course_id: &str, student_id: &str) -> Result<()> {
        let course_id = course_id.trim();
        if course_id.is_empty() {
            return Err(StoreError::Blank { field: "course_id" });
        }
        match self.get_student(student_id)? {
            Some(s) if s.status == EnrollmentStatus::Active => {}
            _ => return Err(StoreError::StudentNotFound(student_id.trim().to_string())),
        }

        self.conn.execute(
            "INSERT INTO course_members (course_id, student_id, status, added_at) VALUES (?1, ?2, 'active', ?3) \
             ON CONFLICT(course_id, student_id) DO UPDATE SET status = 'active'",
            params![course_id, student_id.trim(), timestamp(Utc::now())],
        )?;
        Ok(())
    }

    /// Matching roster for a course: active members with descriptors, in
    /// the order they joined the course.
    pub fn roster_for_course(&self, course_id: &str) -> Result<Roster> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM course_members m JOIN students s ON s.student_id = m.student_id \
             WHERE m.course_id = ?1 AND m.status = 'active' AND s.status = 'active' ORDER BY m.id",
            prefixed_columns("s")
        ))?;
        let raws = stmt
            .query_map(params![course_id.trim()], row_to_student)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut identities = Vec::with_capacity(raws.len());
        for raw in raws {
            let student = raw.decode()?;
            if student.descriptors.is_empty() {
                tracing::warn!(student_id = %student.student_id, course_id, "member has no descriptors; left out of roster");
                continue;
            }
            identities.push(EnrolledIdentity::new(student.student_id, student.name, student.descriptors)?);
        }

        tracing::debug!(course_id, students = identities.len(), "roster loaded");
        Ok(Roster::new(identities)?)
    }
}

fn prefixed_columns(alias: &str) -> String {
    STUDENT_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment(id: &str, name: &str) -> NewEnrollment {
        NewEnrollment {
            student_id: id.to_string(),
            name: name.to_string(),
            descriptors: vec![Descriptor::new(vec![1.0, 0.0]), Descriptor::new(vec![0.0, 1.0])],
            photo_paths: vec![format!("photos/{id}/a/photo_1.jpg")],
        }
    }

    #[test]
    fn test_create_and_get() {
        let mut store = Store::open_in_memory().unwrap();
        let created = store.create_enrollment(&enrollment(" S1 ", " Ada Lovelace ")).unwrap();
        assert_eq!(created.student_id, "S1");
        assert_eq!(created.name, "Ada Lovelace");
        assert_eq!(created.status, EnrollmentStatus::Active);

        let loaded = store.get_student("S1").unwrap().unwrap();
        assert_eq!(loaded.descriptor_count(), 2);
        assert_eq!(loaded.descriptors[1].values, vec![0.0, 1.0]);
        assert_eq!(loaded.photo_paths.len(), 1);
        assert!(store.get_student("S2").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_checks() {
        let mut store = Store::open_in_memory().unwrap();
        store.create_enrollment(&enrollment("S1", "Ada Lovelace")).unwrap();

        let by_id = store.check_enrollment_exists("S1", "Someone Else").unwrap();
        assert!(by_id.exists && by_id.duplicate_id && !by_id.duplicate_name);

        let by_name = store.check_enrollment_exists("S2", "  ada   LOVELACE").unwrap();
        assert!(by_name.exists && by_name.duplicate_name && !by_name.duplicate_id);

        assert_eq!(
            store.check_enrollment_exists("S2", "Grace Hopper").unwrap(),
            EnrollmentCheck::default()
        );

        assert!(matches!(
            store.create_enrollment(&enrollment("S1", "Other")),
            Err(StoreError::DuplicateStudent(_))
        ));
        assert!(matches!(
            store.create_enrollment(&enrollment("S2", "ADA LOVELACE")),
            Err(StoreError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_create_rejects_invalid_input() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.create_enrollment(&enrollment("  ", "Ada")),
            Err(StoreError::Blank { field: "student_id" })
        ));
        let mut no_descriptors = enrollment("S1", "Ada");
        no_descriptors.descriptors.clear();
        assert!(matches!(
            store.create_enrollment(&no_descriptors),
            Err(StoreError::Roster(_))
        ));
    }

    #[test]
    fn test_soft_delete_and_reenroll() {
        let mut store = Store::open_in_memory().unwrap();
        store.create_enrollment(&enrollment("S1", "Ada")).unwrap();

        assert!(store.delete_student("S1").unwrap());
        assert!(!store.delete_student("S1").unwrap());

        let deleted = store.get_student("S1").unwrap().unwrap();
        assert_eq!(deleted.status, EnrollmentStatus::Deleted);
        assert!(deleted.descriptors.is_empty());
        assert!(deleted.photo_paths.is_empty());
        assert!(!store.check_enrollment_exists("S1", "Ada").unwrap().exists);
        assert!(store.list_students(None, 10, 0).unwrap().is_empty());

        let again = store.create_enrollment(&enrollment("S1", "Ada")).unwrap();
        assert_eq!(again.status, EnrollmentStatus::Active);
        assert_eq!(again.descriptor_count(), 2);
    }

    #[test]
    fn test_list_students_newest_first() {
        let mut store = Store::open_in_memory().unwrap();
        for (id, name) in [("S1", "Ada"), ("S2", "Grace"), ("S3", "Edsger")] {
            store.create_enrollment(&enrollment(id, name)).unwrap();
        }
        let ids: Vec<String> = store
            .list_students(None, 10, 0)
            .unwrap()
            .into_iter()
            .map(|s| s.student_id)
            .collect();
        assert_eq!(ids, vec!["S3", "S2", "S1"]);

        let page = store.list_students(None, 1, 1).unwrap();
        assert_eq!(page[0].student_id, "S2");

        store.add_course_member("CS101", "S1").unwrap();
        let in_course = store.list_students(Some("CS101"), 10, 0).unwrap();
        assert_eq!(in_course.len(), 1);
        assert_eq!(in_course[0].student_id, "S1");
    }

    #[test]
    fn test_roster_for_course() {
        let mut store = Store::open_in_memory().unwrap();
        for (id, name) in [("S1", "Ada"), ("S2", "Grace"), ("S3", "Edsger")] {
            store.create_enrollment(&enrollment(id, name)).unwrap();
        }
        store.add_course_member("CS101", "S3").unwrap();
        store.add_course_member("CS101", "S1").unwrap();
        store.add_course_member("CS101", "S1").unwrap();
        store.add_course_member("CS102", "S2").unwrap();

        let roster = store.roster_for_course("CS101").unwrap();
        let ids: Vec<&str> = roster.iter().map(|i| i.student_id()).collect();
        assert_eq!(ids, vec!["S3", "S1"]);
        assert_eq!(roster.get("S1").unwrap().descriptors().len(), 2);

        store.delete_student("S3").unwrap();
        assert_eq!(store.roster_for_course("CS101").unwrap().len(), 1);
        assert!(store.roster_for_course("NOPE").unwrap().is_empty());
    }

    #[test]
    fn test_add_member_requires_active_student() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.add_course_member("CS101", "ghost"),
            Err(StoreError::StudentNotFound(_))
        ));
    }
}
