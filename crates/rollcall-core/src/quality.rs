//! Face quality gate for enrollment capture.
//!
//! Applied only when collecting reference descriptors; attendance matching
//! accepts faces of any size and position.

use crate::types::FaceRegion;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_FACE_SIZE: u32 = 100;
pub const DEFAULT_CENTER_MARGIN: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityIssue {
    TooSmall,
    OffCenterHorizontal,
    OffCenterVertical,
}

impl QualityIssue {
    /// Hint shown to the person being enrolled.
    pub fn hint(&self) -> &'static str {
        match self {
            QualityIssue::TooSmall => "Move closer to the camera",
            QualityIssue::OffCenterHorizontal => "Center your face horizontally",
            QualityIssue::OffCenterVertical => "Center your face vertically",
        }
    }
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.hint())
    }
}

/// Minimum face size and centering bounds for an enrollment photo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityPolicy {
    /// Minimum width and height of the face region, in pixels.
    pub min_face_size: u32,
    /// The face center must lie strictly inside `[margin, 1 - margin]` of the
    /// frame on both axes (0.25 = middle 50%).
    pub center_margin: f32,
    /// When false, the gate is skipped entirely.
    pub enforce: bool,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            center_margin: DEFAULT_CENTER_MARGIN,
            enforce: true,
        }
    }
}

impl QualityPolicy {
    /// Check a face region against the policy.
    ///
    /// Geometry is truncated to whole pixels before comparison.
    pub fn check(&self, region: &FaceRegion, frame_width: u32, frame_height: u32) -> Result<(), QualityIssue> {
        if !self.enforce {
            return Ok(());
        }

        let (x, y) = (region.x as i64, region.y as i64);
        let (w, h) = (region.width as i64, region.height as i64);
        let min = self.min_face_size as i64;
        if w < min || h < min {
            return Err(QualityIssue::TooSmall);
        }

        let center_x = (x + w.div_euclid(2)) as f32;
        let center_y = (y + h.div_euclid(2)) as f32;
        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let (lo, hi) = (self.center_margin, 1.0 - self.center_margin);

        if !(fw * lo < center_x && center_x < fw * hi) {
            return Err(QualityIssue::OffCenterHorizontal);
        }
        if !(fh * lo < center_y && center_y < fh * hi) {
            return Err(QualityIssue::OffCenterVertical);
        }

        Ok(())
    }
}
