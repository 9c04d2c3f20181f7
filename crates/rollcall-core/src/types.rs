use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Face region reported by a locator, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub score: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceRegion {
    pub fn new(x: f32, y: f32, width: f32, height: f32, score: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            score,
            landmarks: None,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns a value in [-1, 1], or 0.0 when either vector has zero norm.
/// Extra trailing values of the longer slice are ignored; callers that care
/// about dimensionality check it first (see [`crate::matcher`]).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

/// Fixed-length face descriptor produced by the embedding extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model that produced this descriptor (e.g., "sface_2021dec").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        cosine_similarity(&self.values, &other.values)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RosterError {
    #[error("student id must not be blank")]
    BlankStudentId,
    #[error("student {0} has no reference descriptors")]
    NoDescriptors(String),
    #[error("student {student_id}: descriptor {index} is empty")]
    EmptyDescriptor { student_id: String, index: usize },
    #[error("student {student_id}: descriptor dimension {actual} does not match {expected}")]
    DimensionMismatch {
        student_id: String,
        expected: usize,
        actual: usize,
    },
    #[error("student {0} appears more than once in the roster")]
    DuplicateStudent(String),
}

/// A student eligible for matching, with one or more reference descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    student_id: String,
    display_name: String,
    descriptors: Vec<Descriptor>,
}

impl EnrolledIdentity {
    pub fn new(
        student_id: impl Into<String>,
        display_name: impl Into<String>,
        descriptors: Vec<Descriptor>,
    ) -> Result<Self, RosterError> {
        let student_id = student_id.into().trim().to_string();
        if student_id.is_empty() {
            return Err(RosterError::BlankStudentId);
        }
        let Some(first) = descriptors.first() else {
            return Err(RosterError::NoDescriptors(student_id));
        };
        let expected = first.dim();
        for (index, d) in descriptors.iter().enumerate() {
            if d.values.is_empty() {
                return Err(RosterError::EmptyDescriptor { student_id, index });
            }
            if d.dim() != expected {
                return Err(RosterError::DimensionMismatch {
                    student_id,
                    expected,
                    actual: d.dim(),
                });
            }
        }

        Ok(Self {
            student_id,
            display_name: display_name.into().trim().to_string(),
            descriptors,
        })
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Dimensionality shared by all reference descriptors.
    pub fn dim(&self) -> usize {
        self.descriptors[0].dim()
    }
}

/// Ordered set of identities eligible for matching in one session.
///
/// Iteration order is insertion order; the matcher breaks similarity ties
/// in favour of the earlier identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    identities: Vec<EnrolledIdentity>,
}

impl Roster {
    pub fn new(identities: Vec<EnrolledIdentity>) -> Result<Self, RosterError> {
        let mut seen = HashSet::new();
        let expected = identities.first().map(EnrolledIdentity::dim);
        for identity in &identities {
            if !seen.insert(identity.student_id()) {
                return Err(RosterError::DuplicateStudent(identity.student_id.clone()));
            }
            if let Some(expected) = expected {
                if identity.dim() != expected {
                    return Err(RosterError::DimensionMismatch {
                        student_id: identity.student_id.clone(),
                        expected,
                        actual: identity.dim(),
                    });
                }
            }
        }
        Ok(Self { identities })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnrolledIdentity> {
        self.identities.iter()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Descriptor dimensionality, or `None` for an empty roster.
    pub fn dim(&self) -> Option<usize> {
        self.identities.first().map(EnrolledIdentity::dim)
    }

    pub fn get(&self, student_id: &str) -> Option<&EnrolledIdentity> {
        self.identities.iter().find(|i| i.student_id == student_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec())
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = desc(&[0.3, -1.2, 4.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = desc(&[1.0, 2.0, 3.0]);
        let b = desc(&[-0.5, 4.0, 0.25]);
        assert_eq!(a.similarity(&b), b.similarity(&a));
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = desc(&[1.0, 0.0]);
        let b = desc(&[0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = desc(&[1.0, 0.0]);
        let b = desc(&[-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let zero = desc(&[0.0, 0.0]);
        let b = desc(&[1.0, 0.0]);
        assert_eq!(zero.similarity(&b), 0.0);
        assert_eq!(b.similarity(&zero), 0.0);
        assert_eq!(zero.similarity(&zero), 0.0);
    }

    #[test]
    fn test_region_center_and_area() {
        let r = FaceRegion::new(10.0, 20.0, 100.0, 50.0, 0.9);
        assert_eq!(r.center(), (60.0, 45.0));
        assert_eq!(r.area(), 5000.0);
    }

    #[test]
    fn test_identity_rejects_blank_id() {
        let err = EnrolledIdentity::new("  ", "Alice", vec![desc(&[1.0])]).unwrap_err();
        assert_eq!(err, RosterError::BlankStudentId);
    }

    #[test]
    fn test_identity_requires_descriptors() {
        let err = EnrolledIdentity::new("S1", "Alice", vec![]).unwrap_err();
        assert_eq!(err, RosterError::NoDescriptors("S1".into()));
    }

    #[test]
    fn test_identity_rejects_mixed_dimensions() {
        let err =
            EnrolledIdentity::new("S1", "Alice", vec![desc(&[1.0, 0.0]), desc(&[1.0])]).unwrap_err();
        assert!(matches!(
            err,
            RosterError::DimensionMismatch { expected: 2, actual: 1, .. }
        ));
    }

    #[test]
    fn test_identity_trims_fields() {
        let id = EnrolledIdentity::new(" S1 ", " Alice ", vec![desc(&[1.0])]).unwrap();
        assert_eq!(id.student_id(), "S1");
        assert_eq!(id.display_name(), "Alice");
    }

    #[test]
    fn test_roster_rejects_duplicates() {
        let a = EnrolledIdentity::new("S1", "Alice", vec![desc(&[1.0])]).unwrap();
        let b = EnrolledIdentity::new("S1", "Bob", vec![desc(&[0.5])]).unwrap();
        assert_eq!(
            Roster::new(vec![a, b]).unwrap_err(),
            RosterError::DuplicateStudent("S1".into())
        );
    }

    #[test]
    fn test_roster_rejects_mixed_dimensions() {
        let a = EnrolledIdentity::new("S1", "Alice", vec![desc(&[1.0, 0.0])]).unwrap();
        let b = EnrolledIdentity::new("S2", "Bob", vec![desc(&[0.5])]).unwrap();
        assert!(Roster::new(vec![a, b]).is_err());
    }

    #[test]
    fn test_roster_preserves_order() {
        let ids = ["S3", "S1", "S2"];
        let roster = Roster::new(
            ids.iter()
                .map(|id| EnrolledIdentity::new(*id, *id, vec![desc(&[1.0])]).unwrap())
                .collect(),
        )
        .unwrap();
        let order: Vec<&str> = roster.iter().map(|i| i.student_id()).collect();
        assert_eq!(order, ids);
        assert_eq!(roster.dim(), Some(1));
        assert!(roster.get("S2").is_some());
    }

    #[test]
    fn test_empty_roster_has_no_dimension() {
        assert!(Roster::empty().is_empty());
        assert_eq!(Roster::empty().dim(), None);
    }
}
