//! Face descriptor extraction via ONNX Runtime.
//!
//! Supports two 112×112 embedding models that differ only in output size and
//! input normalization: OpenCV's SFace (128-dim, default) and InsightFace's
//! ArcFace w600k_r50 (512-dim). Faces with landmarks are aligned to the
//! canonical crop; faces without are cropped and resized.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::pipeline::DescriptorExtractor;
use crate::types::{Descriptor, FaceRegion};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unknown recognizer profile: {0} (expected \"sface\" or \"arcface\")")]
    UnknownProfile(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected}-dim descriptor, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("face region does not intersect the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Input normalization and output shape of one embedding model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognizerProfile {
    pub name: &'static str,
    pub model_version: &'static str,
    pub default_model_file: &'static str,
    pub dim: usize,
    pub mean: f32,
    pub std: f32,
}

impl RecognizerProfile {
    /// OpenCV SFace (2021 Dec). Operating point for the 0.363 threshold.
    pub const SFACE: Self = Self {
        name: "sface",
        model_version: "sface_2021dec",
        default_model_file: "face_recognition_sface_2021dec.onnx",
        dim: 128,
        mean: 0.0,
        std: 1.0,
    };

    /// InsightFace ArcFace ResNet-50 trained on WebFace600K.
    pub const ARCFACE_R50: Self = Self {
        name: "arcface",
        model_version: "w600k_r50",
        default_model_file: "w600k_r50.onnx",
        dim: 512,
        mean: 127.5,
        std: 127.5,
    };

    pub fn from_name(name: &str) -> Result<Self, RecognizerError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sface" => Ok(Self::SFACE),
            "arcface" | "arcface_r50" | "w600k_r50" => Ok(Self::ARCFACE_R50),
            other => Err(RecognizerError::UnknownProfile(other.to_string())),
        }
    }
}

impl Default for RecognizerProfile {
    fn default() -> Self {
        Self::SFACE
    }
}

/// ONNX face recognizer for one [`RecognizerProfile`].
pub struct FaceRecognizer {
    session: Session,
    profile: RecognizerProfile,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path, profile: RecognizerProfile) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            profile = profile.name,
            dim = profile.dim,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self { session, profile })
    }

    pub fn profile(&self) -> &RecognizerProfile {
        &self.profile
    }

    /// Extract an L2-normalized descriptor for `face` in `frame`.
    pub fn extract(&mut self, frame: &RgbImage, face: &FaceRegion) -> Result<Descriptor, RecognizerError> {
        let crop = face_crop(frame, face)?;
        let input = preprocess(&crop, &self.profile);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        finish_descriptor(raw.to_vec(), &self.profile)
    }
}

impl DescriptorExtractor for FaceRecognizer {
    fn extract(&mut self, frame: &RgbImage, face: &FaceRegion) -> Result<Descriptor, RecognizerError> {
        FaceRecognizer::extract(self, frame, face)
    }
}

/// Aligned crop when landmarks are available, otherwise the resized box.
fn face_crop(frame: &RgbImage, face: &FaceRegion) -> Result<RgbImage, RecognizerError> {
    if let Some(landmarks) = face.landmarks.as_ref() {
        return Ok(alignment::align_face(frame, landmarks));
    }

    let (fw, fh) = frame.dimensions();
    let x0 = face.x.max(0.0) as u32;
    let y0 = face.y.max(0.0) as u32;
    let x1 = ((face.x + face.width).max(0.0) as u32).min(fw);
    let y1 = ((face.y + face.height).max(0.0) as u32).min(fh);
    if x1 <= x0 || y1 <= y0 {
        return Err(RecognizerError::EmptyCrop);
    }

    let view = imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    Ok(imageops::resize(&view, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle))
}

/// 112×112 RGB crop to a normalized NCHW tensor.
fn preprocess(crop: &RgbImage, profile: &RecognizerProfile) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels().filter(|(x, y, _)| *x < ALIGNED_SIZE && *y < ALIGNED_SIZE) {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - profile.mean) / profile.std;
        }
    }
    tensor
}

/// Check the output length and L2-normalize.
fn finish_descriptor(raw: Vec<f32>, profile: &RecognizerProfile) -> Result<Descriptor, RecognizerError> {
    if raw.len() != profile.dim {
        return Err(RecognizerError::DimensionMismatch {
            expected: profile.dim,
            actual: raw.len(),
        });
    }

    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    let values = if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    };

    Ok(Descriptor {
        values,
        model_version: Some(profile.model_version.to_string()),
    })
}
