use crate::frame::{load_image, Frame};
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("source not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("video decode failed: {0}")]
    Video(String),
}

/// Geometry and length of a frame source, as reported before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    /// Zero for still-image sequences.
    pub fps: f64,
    /// Frame count advertised by the container; may be absent or approximate.
    pub total_frames: Option<usize>,
}

/// Sequential frame provider for one video.
///
/// A yielded `Err` is terminal: the source yields nothing after it.
pub trait FrameSource: Iterator<Item = Result<Frame, SourceError>> + Send {
    fn info(&self) -> SourceInfo;
}

/// Still images treated as consecutive frames, in file-name order.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
    failed: bool,
    info: SourceInfo,
}

impl ImageSequenceSource {
    /// Open every image file directly inside `dir`.
    ///
    /// An empty directory is a valid zero-frame source.
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let entries = std::fs::read_dir(dir).map_err(|source| SourceError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SourceError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && is_image_path(&path) {
                files.push(path);
            }
        }
        files.sort();

        tracing::debug!(dir = %dir.display(), frames = files.len(), "opened image sequence");
        Ok(Self::from_files(files))
    }

    /// Sequence over explicit files, kept in the given order.
    pub fn from_files(files: Vec<PathBuf>) -> Self {
        let (width, height) = files
            .first()
            .and_then(|p| image::image_dimensions(p).ok())
            .unwrap_or((0, 0));
        let info = SourceInfo {
            width,
            height,
            fps: 0.0,
            total_frames: Some(files.len()),
        };
        Self {
            files,
            next: 0,
            failed: false,
            info,
        }
    }
}

impl Iterator for ImageSequenceSource {
    type Item = Result<Frame, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let path = self.files.get(self.next)?;
        let index = self.next;
        self.next += 1;

        match load_image(path) {
            Ok(image) => Some(Ok(Frame::new(index, image))),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl FrameSource for ImageSequenceSource {
    fn info(&self) -> SourceInfo {
        self.info
    }
}

/// Whether the extension names a still-image format.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Open a directory of frames, a single still image, or a video file.
pub fn open_source(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    if !path.exists() {
        return Err(SourceError::NotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(path)?));
    }
    if is_image_path(path) {
        return Ok(Box::new(ImageSequenceSource::from_files(vec![path.to_path_buf()])));
    }
    open_video(path)
}

#[cfg(feature = "ffmpeg")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    Ok(Box::new(crate::ffmpeg::FfmpegSource::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    Err(SourceError::Unsupported(format!(
        "{} (video decoding requires the `ffmpeg` feature; pass a directory of frames instead)",
        path.display()
    )))
}
