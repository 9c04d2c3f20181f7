use image::RgbImage;
use rollcall_core::detector::{DetectorError, FaceDetector};
use rollcall_core::enrollment::{collect_enrollment_descriptors, EnrollmentError};
use rollcall_core::recognizer::{FaceRecognizer, RecognizerError, RecognizerProfile};
use rollcall_core::{AttendancePipeline, AttendanceRun, Descriptor, PipelineError, Progress, QualityPolicy, Roster};
use rollcall_media::{Frame, FrameSource};
use std::path::Path;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("cannot start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the command handlers to the engine thread.
enum EngineRequest {
    Enroll {
        photos: Vec<RgbImage>,
        policy: QualityPolicy,
        min_photos: usize,
        reply: oneshot::Sender<Result<Vec<Descriptor>, EngineError>>,
    },
    Process {
        source: Box<dyn FrameSource>,
        roster: Roster,
        threshold: f32,
        progress: mpsc::UnboundedSender<Progress>,
        reply: oneshot::Sender<Result<AttendanceRun, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread. The thread exits once every
/// handle is dropped.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect, quality-check and describe one face per enrollment photo.
    pub async fn enroll(
        &self,
        photos: Vec<RgbImage>,
        policy: QualityPolicy,
        min_photos: usize,
    ) -> Result<Vec<Descriptor>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                photos,
                policy,
                min_photos,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run a whole video through the attendance pipeline. Progress reports
    /// are delivered on `progress` as frames complete.
    pub async fn process(
        &self,
        source: Box<dyn FrameSource>,
        roster: Roster,
        threshold: f32,
        progress: mpsc::UnboundedSender<Progress>,
    ) -> Result<AttendanceRun, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Process {
                source,
                roster,
                threshold,
                progress,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load both ONNX models and start the engine on a dedicated OS thread.
///
/// Fails fast if either model cannot be loaded.
pub fn spawn_engine(
    detector_path: &Path,
    detector_confidence: f32,
    recognizer_path: &Path,
    profile: RecognizerProfile,
) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(detector_path, detector_confidence)?;
    let mut recognizer = FaceRecognizer::load(recognizer_path, profile)?;

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll {
                        photos,
                        policy,
                        min_photos,
                        reply,
                    } => {
                        let result =
                            collect_enrollment_descriptors(&mut detector, &mut recognizer, &photos, &policy, min_photos)
                                .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Process {
                        source,
                        roster,
                        threshold,
                        progress,
                        reply,
                    } => {
                        let result = run_process(&mut detector, &mut recognizer, source, &roster, threshold, &progress);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_process(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    source: Box<dyn FrameSource>,
    roster: &Roster,
    threshold: f32,
    progress: &mpsc::UnboundedSender<Progress>,
) -> Result<AttendanceRun, EngineError> {
    let info = source.info();
    tracing::info!(
        width = info.width,
        height = info.height,
        fps = info.fps,
        total_frames = ?info.total_frames,
        students = roster.len(),
        "processing video"
    );

    let frames = source.map(|frame| frame.map(Frame::into_parts));
    let mut pipeline = AttendancePipeline::new(detector, recognizer, threshold);
    let run = pipeline.run(frames, info.total_frames, roster, |p| {
        // The receiver may have gone away; processing continues regardless.
        let _ = progress.send(p);
    })?;
    Ok(run)
}
