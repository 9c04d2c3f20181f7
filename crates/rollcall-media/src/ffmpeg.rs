//! Video decoding through libavformat/libavcodec.

use crate::frame::Frame;
use crate::source::{FrameSource, SourceError, SourceInfo};
use ffmpeg_next::format::context::Input;
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame::video::Video;
use image::RgbImage;
use std::path::Path;

fn video_err(e: impl std::fmt::Display) -> SourceError {
    SourceError::Video(e.to_string())
}

/// Decodes a video file to RGB24 frames, one at a time.
pub struct FfmpegSource {
    input: Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: scaling::Context,
    stream_index: usize,
    info: SourceInfo,
    next_index: usize,
    flushing: bool,
    done: bool,
}

// Safety: the source is moved to the engine thread once and used only there.
// ffmpeg's raw pointers are never shared.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        ffmpeg_next::init().map_err(video_err)?;

        let input = ffmpeg_next::format::input(path).map_err(video_err)?;
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| SourceError::Unsupported(format!("{}: no video stream", path.display())))?;

        let stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters()).map_err(video_err)?;
        let decoder = codec_ctx.decoder().video().map_err(video_err)?;

        let rate = stream.rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };
        let advertised = stream.frames();
        let info = SourceInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            total_frames: (advertised > 0).then_some(advertised as usize),
        };

        let scaler = scaling::Context::get(
            decoder.format(),
            info.width,
            info.height,
            ffmpeg_next::format::Pixel::RGB24,
            info.width,
            info.height,
            scaling::Flags::BILINEAR,
        )
        .map_err(video_err)?;

        tracing::info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps,
            total_frames = ?info.total_frames,
            "opened video"
        );

        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            info,
            next_index: 0,
            flushing: false,
            done: false,
        })
    }

    fn receive(&mut self) -> Option<Result<Frame, SourceError>> {
        let mut decoded = Video::empty();
        self.decoder.receive_frame(&mut decoded).ok()?;

        let mut rgb = Video::empty();
        if let Err(e) = self.scaler.run(&decoded, &mut rgb) {
            return Some(Err(video_err(e)));
        }

        let Some(image) = to_rgb_image(&rgb, self.info.width, self.info.height) else {
            return Some(Err(SourceError::Video(format!(
                "frame {} has an unexpected buffer size",
                self.next_index
            ))));
        };
        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Some(Ok(frame))
    }
}

impl Iterator for FfmpegSource {
    type Item = Result<Frame, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = self.decode_next();
        match &item {
            None | Some(Err(_)) => self.done = true,
            Some(Ok(_)) => {}
        }
        item
    }
}

impl FfmpegSource {
    fn decode_next(&mut self) -> Option<Result<Frame, SourceError>> {
        if let Some(result) = self.receive() {
            return Some(result);
        }
        if self.flushing {
            return None;
        }

        loop {
            let Some((stream, packet)) = self.input.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                return self.receive();
            };

            if stream.index() != self.stream_index {
                continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
                tracing::debug!(error = %e, frame = self.next_index, "skipping undecodable packet");
                continue;
            }
            if let Some(result) = self.receive() {
                return Some(result);
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> SourceInfo {
        self.info
    }
}

/// Copy an RGB24 plane into an image, dropping row padding.
fn to_rgb_image(frame: &Video, width: u32, height: u32) -> Option<RgbImage> {
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row_bytes = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(data.get(start..start + row_bytes)?);
    }
    RgbImage::from_raw(width, height, pixels)
}
