//! On-disk images: per-session evidence frames and enrollment photos.

use crate::error::{Result, StoreError};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Directory tree holding evidence and enrollment photos.
///
/// ```text
/// <root>/frames/<session_id>/<student_id>_best.jpg
/// <root>/photos/<student_id>/<uuid>/photo_<n>.jpg
/// ```
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.root.join("frames").join(path_component(session_id)?))
    }

    /// Write the annotated best frame for a student in a session.
    pub fn save_evidence(&self, session_id: &str, student_id: &str, image: &RgbImage) -> Result<PathBuf> {
        let dir = self.session_dir(session_id)?;
        create_dir(&dir)?;
        let path = dir.join(format!("{}_best.jpg", path_component(student_id)?));
        image.save_with_format(&path, ImageFormat::Jpeg)?;
        tracing::debug!(path = %path.display(), "evidence frame saved");
        Ok(path)
    }

    /// Remove everything written for a session. Missing directories are fine.
    pub fn remove_session(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path: dir, source }),
        }
    }

    /// Store one batch of enrollment photos under a fresh directory.
    /// Photos are numbered from 1.
    pub fn save_enrollment_photos(&self, student_id: &str, photos: &[RgbImage]) -> Result<Vec<PathBuf>> {
        let dir = self
            .root
            .join("photos")
            .join(path_component(student_id)?)
            .join(Uuid::new_v4().to_string());
        create_dir(&dir)?;

        photos
            .iter()
            .enumerate()
            .map(|(i, photo)| -> Result<PathBuf> {
                let path = dir.join(format!("photo_{}.jpg", i + 1));
                photo.save_with_format(&path, ImageFormat::Jpeg)?;
                Ok(path)
            })
            .collect()
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Reject ids that would escape their directory.
fn path_component(id: &str) -> Result<&str> {
    let ok = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0']);
    if ok {
        Ok(id)
    } else {
        Err(StoreError::InvalidPathComponent(id.to_string()))
    }
}
