use crate::source::SourceError;
use image::RgbImage;
use std::path::Path;

/// A decoded RGB frame and its position in the source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: usize, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `(index, image)` pair, the shape the attendance pipeline consumes.
    pub fn into_parts(self) -> (usize, RgbImage) {
        (self.index, self.image)
    }
}

/// Decode an in-memory image (JPEG, PNG, ...) into RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, SourceError> {
    let image = image::load_from_memory(bytes).map_err(|source| SourceError::Decode {
        path: "<memory>".to_string(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Read and decode an image file into RGB.
pub fn load_image(path: &Path) -> Result<RgbImage, SourceError> {
    let bytes = std::fs::read(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let image = image::load_from_memory(&bytes).map_err(|source| SourceError::Decode {
        path: path.display().to_string(),
        source,
    })?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(color: Rgb<u8>) -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 3, color);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_image() {
        let img = decode_image(&png_bytes(Rgb([1, 2, 3]))).unwrap();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(*img.get_pixel(2, 2), Rgb([1, 2, 3]));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(SourceError::Decode { .. })
        ));
    }

    #[test]
    fn test_load_image_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_image(&dir.path().join("missing.jpg")),
            Err(SourceError::Io { .. })
        ));
    }

    #[test]
    fn test_load_image_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        std::fs::write(&path, png_bytes(Rgb([200, 100, 50]))).unwrap();
        let img = load_image(&path).unwrap();
        assert_eq!(*img.get_pixel(0, 0), Rgb([200, 100, 50]));
    }

    #[test]
    fn test_frame_parts() {
        let frame = Frame::new(7, RgbImage::new(2, 2));
        assert_eq!(frame.width(), 2);
        let (index, image) = frame.into_parts();
        assert_eq!(index, 7);
        assert_eq!(image.dimensions(), (2, 2));
    }
}
