//! Descriptor matching against an enrolled roster.

use crate::types::{Descriptor, Roster};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cosine similarity operating point for the SFace descriptor model.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 0.363;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("query descriptor has {actual} dimensions, roster expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Result of matching one query descriptor against a roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Best-scoring student, reported even when below the threshold.
    pub candidate: Option<String>,
    /// Similarity of the best (identity, descriptor) pair, 0.0 for an empty roster.
    pub similarity: f32,
    /// Whether `similarity` reached the acceptance threshold.
    pub accepted: bool,
}

impl MatchOutcome {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            candidate: None,
            similarity,
            accepted: false,
        }
    }

    pub fn accepted(student_id: impl Into<String>, similarity: f32) -> Self {
        Self {
            candidate: Some(student_id.into()),
            similarity,
            accepted: true,
        }
    }

    pub fn near_miss(student_id: impl Into<String>, similarity: f32) -> Self {
        Self {
            candidate: Some(student_id.into()),
            similarity,
            accepted: false,
        }
    }

    /// The matched student, only if the match was accepted.
    pub fn matched_identity(&self) -> Option<&str> {
        if self.accepted {
            self.candidate.as_deref()
        } else {
            None
        }
    }
}

/// Strategy for comparing a query descriptor against a roster of enrolled students.
pub trait Matcher {
    fn compare(
        &self,
        query: &Descriptor,
        roster: &Roster,
        threshold: f32,
    ) -> Result<MatchOutcome, MatchError>;
}

/// Exhaustive cosine similarity matcher.
///
/// Every reference descriptor of every identity is scored. The first pair
/// seen with the maximum similarity wins ties.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        query: &Descriptor,
        roster: &Roster,
        threshold: f32,
    ) -> Result<MatchOutcome, MatchError> {
        let Some(expected) = roster.dim() else {
            return Ok(MatchOutcome::no_match(0.0));
        };
        if query.dim() != expected {
            return Err(MatchError::DimensionMismatch {
                expected,
                actual: query.dim(),
            });
        }

        let mut best_sim = f32::NEG_INFINITY;
        let mut best_id: Option<&str> = None;

        for identity in roster.iter() {
            for reference in identity.descriptors() {
                let sim = query.similarity(reference);
                if sim > best_sim {
                    best_sim = sim;
                    best_id = Some(identity.student_id());
                }
            }
        }

        Ok(match best_id {
            Some(id) if best_sim >= threshold => MatchOutcome::accepted(id, best_sim),
            Some(id) => MatchOutcome::near_miss(id, best_sim),
            None => MatchOutcome::no_match(0.0),
        })
    }
}
