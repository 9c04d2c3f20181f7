//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the frame to 640×640, decodes the three anchor-free stride
//! heads (score, box distance, keypoints) and suppresses overlaps with NMS.

use crate::pipeline::FaceLocator;
use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 128.0;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty frame ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting a frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let (new_w, new_h) = Self::scaled_dims(width, height, scale);
        Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) as f32 / 2.0,
            pad_y: (INPUT_SIZE - new_h) as f32 / 2.0,
        }
    }

    fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
        let w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        (w, h)
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride: score, bbox, keypoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideHeads {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [StrideHeads; 3],
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps for 3 strides), got {}",
                output_names.len()
            )));
        }

        let heads = map_stride_heads(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?heads,
            confidence_threshold,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            heads,
            confidence_threshold,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    /// Detect faces in an RGB frame, sorted by descending score.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectorError::EmptyFrame { width, height });
        }

        let (input, letterbox) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in STRIDES.iter().enumerate() {
            let heads = self.heads[pos];
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = tensor(heads.score, "scores")?;
            let boxes = tensor(heads.bbox, "boxes")?;
            let kps = tensor(heads.kps, "keypoints")?;

            decode_stride(
                StrideData { scores, boxes, kps, stride },
                &letterbox,
                self.confidence_threshold,
                &mut candidates,
            );
        }

        let faces = nms(candidates, self.nms_threshold);
        tracing::trace!(count = faces.len(), "faces detected");
        Ok(faces)
    }
}

impl FaceLocator for FaceDetector {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        self.detect(image)
    }
}

/// Letterbox-resize an RGB frame into a normalized NCHW tensor.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let (new_w, new_h) = Letterbox::scaled_dims(image.width(), image.height(), letterbox.scale);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let off_x = letterbox.pad_x.floor() as usize;
    let off_y = letterbox.pad_y.floor() as usize;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - INPUT_MEAN) / INPUT_STD;
        }
    }

    (tensor, letterbox)
}

/// Map output tensors to stride heads.
///
/// Exports either name their outputs "score_8", "bbox_16", "kps_32", ... or use
/// opaque numeric names in the standard order: scores, boxes, keypoints,
/// each for strides 8/16/32.
fn map_stride_heads(names: &[String]) -> [StrideHeads; 3] {
    let position = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let by_name: Option<Vec<StrideHeads>> = STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideHeads {
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
                kps: position("kps", stride)?,
            })
        })
        .collect();

    match by_name {
        Some(heads) => [heads[0], heads[1], heads[2]],
        None => std::array::from_fn(|i| StrideHeads {
            score: i,
            bbox: i + 3,
            kps: i + 6,
        }),
    }
}

struct StrideData<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    kps: &'a [f32],
    stride: usize,
}

/// Decode one stride head into candidate regions in frame coordinates.
fn decode_stride(data: StrideData<'_>, letterbox: &Letterbox, threshold: f32, out: &mut Vec<FaceRegion>) {
    let StrideData { scores, boxes, kps, stride } = data;
    let grid = INPUT_SIZE as usize / stride;
    let step = stride as f32;

    for (idx, &score) in scores.iter().enumerate().take(grid * grid * ANCHORS_PER_CELL) {
        if score <= threshold {
            continue;
        }
        let Some(d) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * step;
        let ay = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
        let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
        });

        out.push(FaceRegion {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            score,
            landmarks,
        });
    }
}

/// Greedy non-maximum suppression; output is sorted by descending score.
fn nms(mut candidates: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<FaceRegion> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-union of two regions.
fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn face(x: f32, y: f32, w: f32, h: f32, score: f32) -> FaceRegion {
        FaceRegion::new(x, y, w, h, score)
    }

    #[test]
    fn test_iou() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!(iou(&a, &face(20.0, 20.0, 10.0, 10.0, 1.0)).abs() < 1e-6);
        // 5x10 overlap over a 150 union
        assert!((iou(&a, &face(5.0, 0.0, 10.0, 10.0, 1.0)) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let kept = nms(
            vec![
                face(5.0, 5.0, 100.0, 100.0, 0.8),
                face(200.0, 200.0, 50.0, 50.0, 0.7),
                face(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            DEFAULT_NMS_THRESHOLD,
        );
        let scores: Vec<f32> = kept.iter().map(|f| f.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], DEFAULT_NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn test_letterbox_unmap_roundtrip() {
        let lb = Letterbox::fit(320, 240);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert!(lb.pad_x.abs() < 1e-6);
        assert!((lb.pad_y - 80.0).abs() < 1e-6);

        let (x, y) = lb.unmap(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 0.1 && (y - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([255, 255, 255]));
        let (tensor, lb) = preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // Top padding band normalizes to 0.
        assert_eq!(tensor[[0, 0, 10, 320]], 0.0);
        // Image content starts below the band.
        let y = lb.pad_y as usize + 10;
        let expected = (255.0 - INPUT_MEAN) / INPUT_STD;
        assert!((tensor[[0, 1, y, 320]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_map_stride_heads_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let heads = map_stride_heads(&names);
        assert_eq!(heads[0], StrideHeads { score: 2, bbox: 0, kps: 1 });
        assert_eq!(heads[2], StrideHeads { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_map_stride_heads_positional() {
        let names: Vec<String> = (0..9).map(|i: usize| (440 + i).to_string()).collect();
        let heads = map_stride_heads(&names);
        assert_eq!(heads[1], StrideHeads { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_decode_stride_maps_to_frame() {
        // 320x240 frame: scale 2, pad_y 80.
        let lb = Letterbox::fit(320, 240);
        let stride = 32;
        let grid = 640 / stride;
        let cells = grid * grid * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; cells];
        let mut boxes = vec![0.0f32; cells * 4];
        let kps = vec![0.0f32; cells * 10];

        // Anchor at cell (col 5, row 5) -> (160, 160) in input space.
        let idx = (5 * grid + 5) * ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let mut out = Vec::new();
        decode_stride(
            StrideData { scores: &scores, boxes: &boxes, kps: &kps, stride },
            &lb,
            0.5,
            &mut out,
        );

        assert_eq!(out.len(), 1);
        let f = &out[0];
        // (160 - 32, 160 - 32) in input space -> ((128) / 2, (128 - 80) / 2)
        assert!((f.x - 64.0).abs() < 1e-4 && (f.y - 24.0).abs() < 1e-4);
        assert!((f.width - 32.0).abs() < 1e-4 && (f.height - 32.0).abs() < 1e-4);
        let lms = f.landmarks.unwrap();
        assert!((lms[0].0 - 80.0).abs() < 1e-4 && (lms[0].1 - 40.0).abs() < 1e-4);
    }
}
