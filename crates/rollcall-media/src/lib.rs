//! rollcall-media: frame sources for recorded lectures and enrollment photos.
//!
//! Directories of still frames and single images decode with the `image`
//! crate. Video containers need the `ffmpeg` feature.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod source;

pub use frame::{decode_image, load_image, Frame};
pub use source::{is_image_path, open_source, FrameSource, ImageSequenceSource, SourceError, SourceInfo};
