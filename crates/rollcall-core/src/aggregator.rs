//! Per-student aggregation of frame match events across one video.
//!
//! The aggregator is fed events in frame order and keeps, per roster member,
//! the number of accepted matches and the best similarity seen together with
//! the annotated frame that produced it. Once the stream ends, `finalize`
//! turns the running state into present/absent verdicts.

use crate::annotate;
use crate::matcher::MatchOutcome;
use crate::types::{FaceRegion, Roster};
use image::RgbImage;
use std::collections::HashMap;

/// One detected face in one frame, after matching.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMatchEvent {
    pub frame_index: usize,
    pub region: FaceRegion,
    pub outcome: MatchOutcome,
}

/// Frame that produced a student's best similarity, with the face outlined.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceFrame {
    pub frame_index: usize,
    pub region: FaceRegion,
    pub similarity: f32,
    pub image: RgbImage,
}

/// Running summary for one roster member.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentAggregate {
    pub student_id: String,
    /// Number of accepted face matches.
    pub frames_matched: usize,
    /// Highest similarity attributed to this student, accepted or not.
    /// 0.0 until the first event; after that it is the similarity of
    /// `best_frame` and never decreases.
    pub best_similarity: f32,
    pub best_frame: Option<EvidenceFrame>,
}

impl StudentAggregate {
    fn new(student_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            frames_matched: 0,
            best_similarity: 0.0,
            best_frame: None,
        }
    }
}

/// Final decision for one roster member.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentVerdict {
    pub display_name: String,
    pub present: bool,
    pub aggregate: StudentAggregate,
}

impl StudentVerdict {
    pub fn student_id(&self) -> &str {
        &self.aggregate.student_id
    }

    /// Confidence recorded for the student: the best similarity observed.
    pub fn confidence(&self) -> f32 {
        self.aggregate.best_similarity
    }
}

/// Result of aggregating an entire video.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceOutcome {
    pub frames_processed: usize,
    pub threshold: f32,
    /// One verdict per roster member, in roster order.
    pub verdicts: Vec<StudentVerdict>,
}

impl AttendanceOutcome {
    pub fn present_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.present).count()
    }

    pub fn absent_count(&self) -> usize {
        self.verdicts.len() - self.present_count()
    }

    pub fn verdict(&self, student_id: &str) -> Option<&StudentVerdict> {
        self.verdicts.iter().find(|v| v.student_id() == student_id)
    }
}

/// Single-pass, order-sensitive accumulator of [`FrameMatchEvent`]s.
///
/// State is owned per video; nothing is shared between runs.
pub struct AttendanceAggregator {
    threshold: f32,
    names: Vec<String>,
    aggregates: Vec<StudentAggregate>,
    index: HashMap<String, usize>,
    frames_processed: usize,
}

impl AttendanceAggregator {
    pub fn new(roster: &Roster, threshold: f32) -> Self {
        let mut names = Vec::with_capacity(roster.len());
        let mut aggregates = Vec::with_capacity(roster.len());
        let mut index = HashMap::with_capacity(roster.len());
        for (i, identity) in roster.iter().enumerate() {
            names.push(identity.display_name().to_string());
            aggregates.push(StudentAggregate::new(identity.student_id()));
            index.insert(identity.student_id().to_string(), i);
        }

        Self {
            threshold,
            names,
            aggregates,
            index,
            frames_processed: 0,
        }
    }

    /// Apply one event. `frame` is the image the event was detected in; it is
    /// only copied when the event improves the candidate's best similarity.
    ///
    /// Returns `true` if the event replaced the candidate's evidence frame.
    pub fn observe(&mut self, event: &FrameMatchEvent, frame: &RgbImage) -> bool {
        let Some(candidate) = event.outcome.candidate.as_deref() else {
            return false;
        };
        let Some(&i) = self.index.get(candidate) else {
            tracing::warn!(
                student_id = candidate,
                frame = event.frame_index,
                "match event for a student outside the roster; ignoring"
            );
            return false;
        };

        let aggregate = &mut self.aggregates[i];
        if event.outcome.accepted {
            aggregate.frames_matched += 1;
        }

        // The first event always sets the best, even with a similarity <= 0.
        if aggregate.best_frame.is_none() || event.outcome.similarity > aggregate.best_similarity {
            aggregate.best_similarity = event.outcome.similarity;
            aggregate.best_frame = Some(EvidenceFrame {
                frame_index: event.frame_index,
                region: event.region.clone(),
                similarity: event.outcome.similarity,
                image: annotate::evidence_image(frame, &event.region),
            });
            tracing::trace!(
                student_id = candidate,
                frame = event.frame_index,
                similarity = event.outcome.similarity,
                accepted = event.outcome.accepted,
                "new best frame"
            );
            return true;
        }

        false
    }

    /// Mark the current frame as fully consumed.
    pub fn finish_frame(&mut self) {
        self.frames_processed += 1;
    }

    pub fn frames_processed(&self) -> usize {
        self.frames_processed
    }

    pub fn aggregate(&self, student_id: &str) -> Option<&StudentAggregate> {
        self.index.get(student_id).map(|&i| &self.aggregates[i])
    }

    pub fn aggregates(&self) -> &[StudentAggregate] {
        &self.aggregates
    }

    /// Classify every roster member. Always succeeds, including for a
    /// video that produced no frames at all.
    pub fn finalize(self) -> AttendanceOutcome {
        let threshold = self.threshold;
        let verdicts = self
            .names
            .into_iter()
            .zip(self.aggregates)
            .map(|(display_name, aggregate)| StudentVerdict {
                present: aggregate.frames_matched > 0 && aggregate.best_similarity >= threshold,
                display_name,
                aggregate,
            })
            .collect();

        AttendanceOutcome {
            frames_processed: self.frames_processed,
            threshold,
            verdicts,
        }
    }
}
