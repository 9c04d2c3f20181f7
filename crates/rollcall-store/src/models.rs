use chrono::{DateTime, Utc};
use rollcall_core::Descriptor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Deleted,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EnrollmentStatus::Active),
            "deleted" => Some(EnrollmentStatus::Deleted),
            _ => None,
        }
    }
}

/// Result of a pre-enrollment duplicate check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrollmentCheck {
    pub exists: bool,
    pub duplicate_id: bool,
    pub duplicate_name: bool,
}

#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub student_id: String,
    pub name: String,
    pub descriptors: Vec<Descriptor>,
    pub photo_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentRecord {
    pub student_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub descriptors: Vec<Descriptor>,
    pub photo_paths: Vec<String>,
    pub model_version: Option<String>,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentRecord {
    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub course_id: String,
    pub teacher_id: Option<String>,
    pub video_filename: String,
    pub processing_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub course_id: String,
    pub teacher_id: Option<String>,
    pub video_filename: String,
    pub total_frames: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub threshold: f32,
    pub processing_seconds: f64,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub session_id: String,
    pub student_id: String,
    pub student_name: String,
    pub present: bool,
    /// Best similarity seen for the student. For absent students this is the
    /// closest sub-threshold similarity (0.0 if never a candidate) and is
    /// informational only.
    pub confidence: f32,
    pub frames_matched: usize,
    pub frames_total: usize,
    pub evidence_path: Option<String>,
}

/// Filters for [`crate::Store::history`].
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub course_id: Option<String>,
    pub teacher_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            course_id: None,
            teacher_id: None,
            limit: 20,
            offset: 0,
        }
    }
}

/// Trimmed, lowercased, whitespace-collapsed form used for duplicate names.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
