//! Local video files decoded with FFmpeg.
//!
//! Frames are converted to RGB24 in-memory. Seeking goes through
//! `avformat_seek_file` with an upper bound at the target, which lands on the
//! last keyframe at or before it.

use std::path::Path;

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::{DecodedFrame, Rate, SeekableVideo, VideoMetadata};
use crate::error::PipelineError;

/// `AV_TIME_BASE`: container-level timestamps are in microseconds.
const AV_TIME_BASE: i64 = 1_000_000;

pub(crate) struct FfmpegVideo {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    metadata: VideoMetadata,
    draining: bool,
}

impl FfmpegVideo {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path).map_err(|e| {
            PipelineError::InvalidInput(format!("unable to open video: {}", e))
        })?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| PipelineError::InvalidInput("file has no video track".into()))?;
        let stream_index = input_stream.index();

        let avg = input_stream.avg_frame_rate();
        let tb = input_stream.time_base();
        let metadata = VideoMetadata {
            frame_rate: Some(Rate::new(avg.numerator() as i64, avg.denominator() as i64))
                .filter(Rate::is_positive),
            frame_count: u64::try_from(input_stream.frames()).ok().filter(|n| *n > 0),
            duration_secs: Some(input.duration())
                .filter(|d| *d > 0)
                .map(|d| d as f64 / AV_TIME_BASE as f64),
            time_base: Rate::new(tb.numerator() as i64, tb.denominator() as i64),
        };

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PipelineError::InvalidInput(format!("unsupported video codec: {}", e)))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::debug!(
            "opened {} (fps {:?}, frames {:?}, duration {:?})",
            path.display(),
            metadata.frame_rate,
            metadata.frame_count,
            metadata.duration_secs
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            metadata,
            draining: false,
        })
    }

    fn to_decoded(&mut self, frame: &ffmpeg::frame::Video) -> Result<DecodedFrame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(frame, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let image = RgbImage::from_raw(width, height, pixels)
            .context("decoded frame does not match its dimensions")?;
        Ok(DecodedFrame {
            pts: frame.pts(),
            image,
        })
    }
}

impl SeekableVideo for FfmpegVideo {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn seek_keyframe(&mut self, ticks: i64) -> Result<()> {
        let tb = self.metadata.time_base;
        let micros = (ticks as i128 * tb.num as i128 * AV_TIME_BASE as i128) / tb.den.max(1) as i128;
        let micros = i64::try_from(micros).context("seek target overflows")?;
        self.input
            .seek(micros, ..micros)
            .context("seek to keyframe")?;
        self.decoder.flush();
        self.draining = false;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.to_decoded(&decoded).map(Some);
            }
            if self.draining {
                return Ok(None);
            }

            let mut fed = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                fed = true;
                break;
            }
            if !fed {
                self.decoder.send_eof().context("flush ffmpeg decoder")?;
                self.draining = true;
            }
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
