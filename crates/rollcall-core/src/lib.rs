//! rollcall-core: attendance decisions from classroom video.
//!
//! Faces are located with SCRFD and described with SFace or ArcFace, both
//! through ONNX Runtime. Descriptors are matched against an enrolled roster
//! by cosine similarity and aggregated per student across a whole video.

pub mod aggregator;
pub mod alignment;
pub mod annotate;
pub mod detector;
pub mod enrollment;
pub mod matcher;
pub mod pipeline;
pub mod quality;
pub mod recognizer;
pub mod types;

pub use aggregator::{AttendanceAggregator, AttendanceOutcome, EvidenceFrame, FrameMatchEvent, StudentAggregate, StudentVerdict};
pub use matcher::{CosineMatcher, MatchError, MatchOutcome, Matcher, DEFAULT_ACCEPTANCE_THRESHOLD};
pub use pipeline::{AttendancePipeline, AttendanceRun, DescriptorExtractor, FaceLocator, PipelineError, Progress};
pub use quality::{QualityIssue, QualityPolicy};
pub use types::{cosine_similarity, Descriptor, EnrolledIdentity, FaceRegion, Roster, RosterError};
