//! Frame-by-frame attendance pipeline.
//!
//! Wires a face locator, a descriptor extractor and a matcher into the
//! [`AttendanceAggregator`]. Models are reached only through the
//! [`FaceLocator`] and [`DescriptorExtractor`] capabilities so the pipeline
//! runs the same against ONNX backends or test fakes.

use crate::aggregator::{AttendanceAggregator, AttendanceOutcome, FrameMatchEvent};
use crate::detector::DetectorError;
use crate::matcher::{CosineMatcher, MatchError, Matcher};
use crate::recognizer::RecognizerError;
use crate::types::{Descriptor, FaceRegion, Roster};
use image::RgbImage;
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

/// Finds faces in a frame.
pub trait FaceLocator {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Produces a descriptor for one face in a frame.
pub trait DescriptorExtractor {
    fn extract(&mut self, image: &RgbImage, face: &FaceRegion) -> Result<Descriptor, RecognizerError>;
}

impl<T: FaceLocator + ?Sized> FaceLocator for &mut T {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        (**self).locate(image)
    }
}

impl<T: DescriptorExtractor + ?Sized> DescriptorExtractor for &mut T {
    fn extract(&mut self, image: &RgbImage, face: &FaceRegion) -> Result<Descriptor, RecognizerError> {
        (**self).extract(image, face)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("frame {index}: {message}")]
    Source { index: usize, message: String },
    #[error("face detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("matching failed: {0}")]
    Match(#[from] MatchError),
}

/// Progress report, delivered after every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub frames_done: usize,
    /// Frame count advertised by the source, when known.
    pub total: Option<usize>,
}

impl Progress {
    /// Completed fraction in [0, 1], if the total is known.
    pub fn fraction(&self) -> Option<f32> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.frames_done as f32 / total as f32).min(1.0)),
            None => None,
        }
    }
}

/// Counters collected while running; not part of the attendance decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub faces_detected: usize,
    pub descriptors_failed: usize,
    pub near_misses: usize,
    pub accepted_matches: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRun {
    pub outcome: AttendanceOutcome,
    pub stats: RunStats,
}

pub struct AttendancePipeline<L, X, M = CosineMatcher> {
    locator: L,
    extractor: X,
    matcher: M,
    threshold: f32,
}

impl<L: FaceLocator, X: DescriptorExtractor> AttendancePipeline<L, X, CosineMatcher> {
    pub fn new(locator: L, extractor: X, threshold: f32) -> Self {
        Self::with_matcher(locator, extractor, CosineMatcher, threshold)
    }
}

impl<L: FaceLocator, X: DescriptorExtractor, M: Matcher> AttendancePipeline<L, X, M> {
    pub fn with_matcher(locator: L, extractor: X, matcher: M, threshold: f32) -> Self {
        Self {
            locator,
            extractor,
            matcher,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Detect, extract and match every face in one frame.
    ///
    /// Faces whose descriptor cannot be extracted are skipped and counted in
    /// `stats.descriptors_failed`.
    pub fn match_frame(
        &mut self,
        frame_index: usize,
        image: &RgbImage,
        roster: &Roster,
        stats: &mut RunStats,
    ) -> Result<Vec<FrameMatchEvent>, PipelineError> {
        let faces = self.locator.locate(image)?;
        stats.faces_detected += faces.len();

        let mut events = Vec::with_capacity(faces.len());
        for region in faces {
            let descriptor = match self.extractor.extract(image, &region) {
                Ok(d) => d,
                Err(e) => {
                    stats.descriptors_failed += 1;
                    tracing::warn!(frame = frame_index, error = %e, "descriptor extraction failed; skipping face");
                    continue;
                }
            };

            let outcome = self.matcher.compare(&descriptor, roster, self.threshold)?;
            if outcome.accepted {
                stats.accepted_matches += 1;
            } else if outcome.candidate.is_some() {
                stats.near_misses += 1;
            }
            tracing::trace!(
                frame = frame_index,
                candidate = ?outcome.candidate,
                similarity = outcome.similarity,
                accepted = outcome.accepted,
                "face matched"
            );

            events.push(FrameMatchEvent {
                frame_index,
                region,
                outcome,
            });
        }

        Ok(events)
    }

    /// Consume a whole video and decide attendance for every roster member.
    ///
    /// A frame that fails to decode aborts the run with no partial outcome.
    pub fn run<I, E, F>(
        &mut self,
        frames: I,
        total_hint: Option<usize>,
        roster: &Roster,
        mut progress: F,
    ) -> Result<AttendanceRun, PipelineError>
    where
        I: IntoIterator<Item = Result<(usize, RgbImage), E>>,
        E: Display,
        F: FnMut(Progress),
    {
        let mut aggregator = AttendanceAggregator::new(roster, self.threshold);
        let mut stats = RunStats::default();

        for (position, item) in frames.into_iter().enumerate() {
            let (index, image) = item.map_err(|e| PipelineError::Source {
                index: position,
                message: e.to_string(),
            })?;

            for event in self.match_frame(index, &image, roster, &mut stats)? {
                aggregator.observe(&event, &image);
            }
            aggregator.finish_frame();

            progress(Progress {
                frames_done: aggregator.frames_processed(),
                total: total_hint,
            });
        }

        let outcome = aggregator.finalize();
        tracing::info!(
            frames = outcome.frames_processed,
            present = outcome.present_count(),
            absent = outcome.absent_count(),
            faces = stats.faces_detected,
            failed_extractions = stats.descriptors_failed,
            "attendance run complete"
        );

        Ok(AttendanceRun { outcome, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::DEFAULT_ACCEPTANCE_THRESHOLD;
    use crate::types::EnrolledIdentity;
    use std::collections::HashMap;

    /// Per-frame scripted faces. A face's `score` carries the similarity its
    /// descriptor should have against `[1, 0]`; a negative score makes the
    /// extractor fail.
    struct ScriptedLocator {
        frames: HashMap<u8, Vec<f32>>,
    }

    impl FaceLocator for ScriptedLocator {
        fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
            // Frame id is encoded in the first pixel.
            let id = image.get_pixel(0, 0)[0];
            if id == 255 {
                return Err(DetectorError::InferenceFailed("scripted failure".into()));
            }
            Ok(self
                .frames
                .get(&id)
                .map(|sims| {
                    sims.iter()
                        .enumerate()
                        .map(|(i, &s)| FaceRegion::new(i as f32 * 2.0, 0.0, 2.0, 2.0, s))
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    struct UnitCircleExtractor;

    impl DescriptorExtractor for UnitCircleExtractor {
        fn extract(&mut self, _image: &RgbImage, face: &FaceRegion) -> Result<Descriptor, RecognizerError> {
            let s = face.score;
            if s < 0.0 {
                return Err(RecognizerError::InferenceFailed("scripted failure".into()));
            }
            Ok(Descriptor::new(vec![s, (1.0 - s * s).max(0.0).sqrt()]))
        }
    }

    fn frame(id: u8) -> RgbImage {
        let mut img = RgbImage::new(8, 8);
        img.put_pixel(0, 0, image::Rgb([id, 0, 0]));
        img
    }

    fn alice() -> Roster {
        Roster::new(vec![EnrolledIdentity::new("S1", "Alice", vec![Descriptor::new(vec![1.0, 0.0])]).unwrap()])
            .unwrap()
    }

    fn pipeline(frames: HashMap<u8, Vec<f32>>) -> AttendancePipeline<ScriptedLocator, UnitCircleExtractor> {
        AttendancePipeline::new(ScriptedLocator { frames }, UnitCircleExtractor, DEFAULT_ACCEPTANCE_THRESHOLD)
    }

    fn video(n: u8) -> Vec<Result<(usize, RgbImage), String>> {
        (0..n).map(|i| Ok((i as usize, frame(i)))).collect()
    }

    #[test]
    fn test_run_presence_from_accepted_matches() {
        // One face per frame except frame 4.
        let sims = [0.4, 0.5, 0.38, 0.9, -2.0, 0.4, 0.4, 0.4, 0.4, 0.4];
        let frames = sims
            .iter()
            .enumerate()
            .filter(|(_, &s)| s > -2.0)
            .map(|(i, &s)| (i as u8, vec![s]))
            .collect();
        let mut p = pipeline(frames);

        let run = p.run(video(10), Some(10), &alice(), |_| {}).unwrap();
        let v = run.outcome.verdict("S1").unwrap();
        assert_eq!(run.outcome.frames_processed, 10);
        assert_eq!(v.aggregate.frames_matched, 9);
        assert!((v.confidence() - 0.9).abs() < 1e-5);
        assert!(v.present);
        assert_eq!(v.aggregate.best_frame.as_ref().unwrap().frame_index, 3);
        assert_eq!(run.stats.accepted_matches, 9);
    }

    #[test]
    fn test_run_below_threshold_is_absent() {
        let frames = (0..5u8).map(|i| (i, vec![0.1 + 0.025 * i as f32])).collect();
        let mut p = pipeline(frames);

        let run = p.run(video(5), Some(5), &alice(), |_| {}).unwrap();
        let v = run.outcome.verdict("S1").unwrap();
        assert!(!v.present);
        assert_eq!(v.aggregate.frames_matched, 0);
        assert!((v.confidence() - 0.2).abs() < 1e-5);
        assert_eq!(run.stats.near_misses, 5);
    }

    #[test]
    fn test_run_empty_video() {
        let mut p = pipeline(HashMap::new());
        let mut reports = 0;
        let run = p
            .run(Vec::<Result<(usize, RgbImage), String>>::new(), Some(0), &alice(), |_| reports += 1)
            .unwrap();
        assert_eq!(run.outcome.frames_processed, 0);
        assert_eq!(run.outcome.absent_count(), 1);
        assert_eq!(reports, 0);
    }

    #[test]
    fn test_run_source_error_is_terminal() {
        let mut p = pipeline(HashMap::from([(0, vec![0.9])]));
        let frames: Vec<Result<(usize, RgbImage), String>> =
            vec![Ok((0, frame(0))), Err("corrupt frame".to_string()), Ok((2, frame(2)))];

        let err = p.run(frames, None, &alice(), |_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::Source { index: 1, .. }));
        assert!(err.to_string().contains("corrupt frame"));
    }

    #[test]
    fn test_run_detector_error_is_terminal() {
        let mut p = pipeline(HashMap::new());
        let frames: Vec<Result<(usize, RgbImage), String>> = vec![Ok((0, frame(255)))];
        assert!(matches!(
            p.run(frames, None, &alice(), |_| {}),
            Err(PipelineError::Detector(_))
        ));
    }

    #[test]
    fn test_extraction_failure_skips_face() {
        // Frame 0 has a failing face next to a good one.
        let mut p = pipeline(HashMap::from([(0, vec![-1.0, 0.8])]));
        let run = p.run(video(1), Some(1), &alice(), |_| {}).unwrap();
        assert_eq!(run.stats.faces_detected, 2);
        assert_eq!(run.stats.descriptors_failed, 1);
        assert_eq!(run.outcome.verdict("S1").unwrap().aggregate.frames_matched, 1);
    }

    #[test]
    fn test_progress_reported_per_frame() {
        let mut p = pipeline(HashMap::new());
        let mut seen = Vec::new();
        p.run(video(4), Some(4), &alice(), |pr| seen.push(pr)).unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[3].frames_done, 4);
        assert_eq!(seen[1].fraction(), Some(0.5));
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(Progress { frames_done: 3, total: None }.fraction(), None);
        assert_eq!(Progress { frames_done: 0, total: Some(0) }.fraction(), Some(1.0));
        // Sources may under-report their length.
        assert_eq!(Progress { frames_done: 12, total: Some(10) }.fraction(), Some(1.0));
    }

    #[test]
    fn test_match_frame_no_faces() {
        let mut p = pipeline(HashMap::new());
        let mut stats = RunStats::default();
        let events = p.match_frame(0, &frame(7), &alice(), &mut stats).unwrap();
        assert!(events.is_empty());
        assert_eq!(stats, RunStats::default());
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let roster = Roster::new(vec![
            EnrolledIdentity::new("S1", "Alice", vec![Descriptor::new(vec![1.0, 0.0, 0.0])]).unwrap(),
        ])
        .unwrap();
        let mut p = pipeline(HashMap::from([(0, vec![0.5])]));
        assert!(matches!(
            p.run(video(1), None, &roster, |_| {}),
            Err(PipelineError::Match(_))
        ));
    }

    #[test]
    fn test_borrowed_capabilities() {
        let mut locator = ScriptedLocator {
            frames: HashMap::from([(0, vec![0.95])]),
        };
        let mut extractor = UnitCircleExtractor;
        let mut p = AttendancePipeline::new(&mut locator, &mut extractor, DEFAULT_ACCEPTANCE_THRESHOLD);
        let run = p.run(video(1), None, &alice(), |_| {}).unwrap();
        assert!(run.outcome.verdict("S1").unwrap().present);
    }
}
