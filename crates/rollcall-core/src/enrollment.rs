//! Reference descriptor collection for a new student.

use crate::detector::DetectorError;
use crate::pipeline::{DescriptorExtractor, FaceLocator};
use crate::quality::{QualityIssue, QualityPolicy};
use crate::recognizer::RecognizerError;
use crate::types::Descriptor;
use image::RgbImage;
use thiserror::Error;

pub const DEFAULT_ENROLLMENT_PHOTOS: usize = 3;

/// Photo numbers are 1-based.
#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("need {required} photos, got {provided}")]
    NotEnoughPhotos { required: usize, provided: usize },
    #[error("no face detected in photo {0}")]
    NoFace(usize),
    #[error("multiple faces detected in photo {photo} ({count}); use photos with a single person")]
    MultipleFaces { photo: usize, count: usize },
    #[error("photo {photo}: {issue}")]
    PoorQuality { photo: usize, issue: QualityIssue },
    #[error("failed to extract face descriptor from photo {photo}: {source}")]
    ExtractionFailed {
        photo: usize,
        #[source]
        source: RecognizerError,
    },
    #[error("face detection failed on photo {photo}: {source}")]
    Detector {
        photo: usize,
        #[source]
        source: DetectorError,
    },
}

/// Produce one reference descriptor per photo.
///
/// Every photo must show exactly one face that passes `policy`. The first
/// failing photo aborts the whole enrollment.
pub fn collect_enrollment_descriptors<L, X>(
    mut locator: L,
    mut extractor: X,
    photos: &[RgbImage],
    policy: &QualityPolicy,
    min_photos: usize,
) -> Result<Vec<Descriptor>, EnrollmentError>
where
    L: FaceLocator,
    X: DescriptorExtractor,
{
    if photos.len() < min_photos.max(1) {
        return Err(EnrollmentError::NotEnoughPhotos {
            required: min_photos.max(1),
            provided: photos.len(),
        });
    }

    let mut descriptors = Vec::with_capacity(photos.len());
    for (i, photo) in photos.iter().enumerate() {
        let n = i + 1;
        let faces = locator
            .locate(photo)
            .map_err(|source| EnrollmentError::Detector { photo: n, source })?;

        let face = match faces.as_slice() {
            [] => return Err(EnrollmentError::NoFace(n)),
            [face] => face,
            many => {
                return Err(EnrollmentError::MultipleFaces {
                    photo: n,
                    count: many.len(),
                })
            }
        };

        policy
            .check(face, photo.width(), photo.height())
            .map_err(|issue| EnrollmentError::PoorQuality { photo: n, issue })?;

        let descriptor = extractor
            .extract(photo, face)
            .map_err(|source| EnrollmentError::ExtractionFailed { photo: n, source })?;

        tracing::debug!(photo = n, score = face.score, dim = descriptor.dim(), "enrollment photo accepted");
        descriptors.push(descriptor);
    }

    Ok(descriptors)
}
