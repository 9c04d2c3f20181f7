//! Attendance sessions and per-student records.

use crate::error::{Result, StoreError};
use crate::evidence::EvidenceStore;
use crate::models::{AttendanceRecord, HistoryQuery, NewSession, SessionRecord};
use crate::{parse_timestamp, timestamp, Store};
use chrono::Utc;
use rollcall_core::AttendanceOutcome;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, course_id, teacher_id, video_filename, total_frames, present_count, \
     absent_count, threshold, processing_seconds, processed_at";

struct RawSession {
    record: SessionRecord,
    processed_at: String,
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<RawSession> {
    Ok(RawSession {
        record: SessionRecord {
            id: row.get(0)?,
            course_id: row.get(1)?,
            teacher_id: row.get(2)?,
            video_filename: row.get(3)?,
            total_frames: row.get::<_, i64>(4)? as usize,
            present_count: row.get::<_, i64>(5)? as usize,
            absent_count: row.get::<_, i64>(6)? as usize,
            threshold: row.get::<_, f64>(7)? as f32,
            processing_seconds: row.get(8)?,
            processed_at: Utc::now(),
        },
        processed_at: row.get(9)?,
    })
}

impl RawSession {
    fn decode(mut self) -> Result<SessionRecord> {
        self.record.processed_at = parse_timestamp(&self.processed_at)?;
        Ok(self.record)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        student_id: row.get(2)?,
        student_name: row.get(3)?,
        present: row.get(4)?,
        confidence: row.get::<_, f64>(5)? as f32,
        frames_matched: row.get::<_, i64>(6)? as usize,
        frames_total: row.get::<_, i64>(7)? as usize,
        evidence_path: row.get(8)?,
    })
}

impl Store {
    /// Persist one processed video: evidence frames for present students,
    /// then the session row and one record per roster member in a single
    /// transaction. Evidence written for a failed transaction is removed.
    pub fn save_attendance(
        &mut self,
        new: &NewSession,
        outcome: &AttendanceOutcome,
        evidence: &EvidenceStore,
    ) -> Result<SessionRecord> {
        let session = SessionRecord {
            id: Uuid::new_v4().to_string(),
            course_id: new.course_id.clone(),
            teacher_id: new.teacher_id.clone(),
            video_filename: new.video_filename.clone(),
            total_frames: outcome.frames_processed,
            present_count: outcome.present_count(),
            absent_count: outcome.absent_count(),
            threshold: outcome.threshold,
            processing_seconds: new.processing_seconds,
            processed_at: Utc::now(),
        };

        let result = self.write_session(&session, outcome, evidence);
        if result.is_err() {
            if let Err(e) = evidence.remove_session(&session.id) {
                tracing::warn!(session_id = %session.id, error = %e, "failed to clean up evidence");
            }
        }
        result?;

        tracing::info!(
            session_id = %session.id,
            course_id = %session.course_id,
            present = session.present_count,
            absent = session.absent_count,
            "attendance saved"
        );
        Ok(session)
    }

    fn write_session(
        &mut self,
        session: &SessionRecord,
        outcome: &AttendanceOutcome,
        evidence: &EvidenceStore,
    ) -> Result<()> {
        let mut evidence_paths = Vec::with_capacity(outcome.verdicts.len());
        for verdict in &outcome.verdicts {
            let path = match (&verdict.aggregate.best_frame, verdict.present) {
                (Some(frame), true) => Some(
                    evidence
                        .save_evidence(&session.id, verdict.student_id(), &frame.image)?
                        .display()
                        .to_string(),
                ),
                _ => None,
            };
            evidence_paths.push(path);
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO attendance_sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                session.id,
                session.course_id,
                session.teacher_id,
                session.video_filename,
                session.total_frames as i64,
                session.present_count as i64,
                session.absent_count as i64,
                session.threshold as f64,
                session.processing_seconds,
                timestamp(session.processed_at),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO attendance_records \
                 (id, session_id, student_id, student_name, is_present, confidence, frames_matched, frames_total, evidence_path) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (verdict, path) in outcome.verdicts.iter().zip(&evidence_paths) {
                stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    session.id,
                    verdict.student_id(),
                    verdict.display_name,
                    verdict.present,
                    verdict.confidence() as f64,
                    verdict.aggregate.frames_matched as i64,
                    outcome.frames_processed as i64,
                    path,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM attendance_sessions WHERE id = ?1"),
                params![session_id],
                row_to_session,
            )
            .optional()?;
        raw.map(RawSession::decode).transpose()
    }

    /// Records of a session, ordered by student name.
    pub fn get_records(&self, session_id: &str) -> Result<Vec<AttendanceRecord>> {
        if self.get_session(session_id)?.is_none() {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, student_id, student_name, is_present, confidence, frames_matched, \
             frames_total, evidence_path FROM attendance_records WHERE session_id = ?1 \
             ORDER BY student_name, student_id",
        )?;
        let rows = stmt.query_map(params![session_id], row_to_record)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Sessions newest first, filtered by course and/or teacher.
    pub fn history(&self, query: &HistoryQuery) -> Result<Vec<SessionRecord>> {
        let mut filters = Vec::new();
        let mut args: Vec<Value> = Vec::new();
        if let Some(course) = &query.course_id {
            args.push(Value::Text(course.clone()));
            filters.push(format!("course_id = ?{}", args.len()));
        }
        if let Some(teacher) = &query.teacher_id {
            args.push(Value::Text(teacher.clone()));
            filters.push(format!("teacher_id = ?{}", args.len()));
        }
        let where_clause = if filters.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", filters.join(" AND "))
        };
        args.push(Value::Integer(query.limit as i64));
        let limit_idx = args.len();
        args.push(Value::Integer(query.offset as i64));
        let offset_idx = args.len();

        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM attendance_sessions {where_clause} \
             ORDER BY processed_at DESC, rowid DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_session)?;
        let raws = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawSession::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::aggregator::{AttendanceAggregator, FrameMatchEvent};
    use rollcall_core::{Descriptor, EnrolledIdentity, FaceRegion, MatchOutcome, Roster};
    use image::RgbImage;

    fn roster() -> Roster {
        Roster::new(vec![
            EnrolledIdentity::new("S2", "Zed", vec![Descriptor::new(vec![1.0, 0.0])]).unwrap(),
            EnrolledIdentity::new("S1", "Ada", vec![Descriptor::new(vec![0.0, 1.0])]).unwrap(),
        ])
        .unwrap()
    }

    /// S1 seen and accepted in frame 1, S2 only as a near miss.
    fn outcome() -> AttendanceOutcome {
        let roster = roster();
        let mut agg = AttendanceAggregator::new(&roster, 0.363);
        let image = RgbImage::new(32, 32);
        let events = [
            FrameMatchEvent {
                frame_index: 0,
                region: FaceRegion::new(2.0, 2.0, 8.0, 8.0, 0.9),
                outcome: MatchOutcome::near_miss("S2", 0.2),
            },
            FrameMatchEvent {
                frame_index: 1,
                region: FaceRegion::new(4.0, 4.0, 8.0, 8.0, 0.9),
                outcome: MatchOutcome::accepted("S1", 0.8),
            },
        ];
        for e in &events {
            agg.observe(e, &image);
            agg.finish_frame();
        }
        agg.finalize()
    }

    fn new_session(course: &str, teacher: Option<&str>) -> NewSession {
        NewSession {
            course_id: course.to_string(),
            teacher_id: teacher.map(str::to_string),
            video_filename: "lecture.mp4".to_string(),
            processing_seconds: 1.5,
        }
    }

    #[test]
    fn test_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::new(dir.path());
        let mut store = Store::open_in_memory().unwrap();

        let session = store
            .save_attendance(&new_session("CS101", Some("T1")), &outcome(), &evidence)
            .unwrap();
        assert_eq!(session.total_frames, 2);
        assert_eq!((session.present_count, session.absent_count), (1, 1));

        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.teacher_id.as_deref(), Some("T1"));
        assert!((loaded.threshold - 0.363).abs() < 1e-6);

        let records = store.get_records(&session.id).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.student_name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Zed"]);

        let ada = &records[0];
        assert!(ada.present);
        assert_eq!(ada.frames_matched, 1);
        assert_eq!(ada.frames_total, 2);
        let path = ada.evidence_path.as_deref().unwrap();
        assert!(path.ends_with(&format!("{}/S1_best.jpg", session.id)));
        assert!(std::path::Path::new(path).exists());

        let zed = &records[1];
        assert!(!zed.present);
        assert!((zed.confidence - 0.2).abs() < 1e-6);
        assert!(zed.evidence_path.is_none());
    }

    #[test]
    fn test_empty_outcome_saves_session() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::new(dir.path());
        let mut store = Store::open_in_memory().unwrap();
        let empty = AttendanceAggregator::new(&roster(), 0.363).finalize();

        let session = store.save_attendance(&new_session("CS101", None), &empty, &evidence).unwrap();
        assert_eq!(session.total_frames, 0);
        assert_eq!(session.absent_count, 2);
        assert_eq!(store.get_records(&session.id).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_session() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_session("nope").unwrap().is_none());
        assert!(matches!(
            store.get_records("nope"),
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_history_filters_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::new(dir.path());
        let mut store = Store::open_in_memory().unwrap();
        let out = outcome();

        let a = store.save_attendance(&new_session("CS101", Some("T1")), &out, &evidence).unwrap();
        let b = store.save_attendance(&new_session("CS102", Some("T1")), &out, &evidence).unwrap();
        let c = store.save_attendance(&new_session("CS101", Some("T2")), &out, &evidence).unwrap();

        let all: Vec<String> = store
            .history(&HistoryQuery::default())
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(all, vec![c.id.clone(), b.id.clone(), a.id.clone()]);

        let cs101 = store
            .history(&HistoryQuery {
                course_id: Some("CS101".into()),
                ..HistoryQuery::default()
            })
            .unwrap();
        assert_eq!(cs101.len(), 2);

        let t1_cs101 = store
            .history(&HistoryQuery {
                course_id: Some("CS101".into()),
                teacher_id: Some("T1".into()),
                ..HistoryQuery::default()
            })
            .unwrap();
        assert_eq!(t1_cs101.len(), 1);
        assert_eq!(t1_cs101[0].id, a.id);

        let page = store
            .history(&HistoryQuery {
                limit: 1,
                offset: 1,
                ..HistoryQuery::default()
            })
            .unwrap();
        assert_eq!(page[0].id, b.id);
    }
}
