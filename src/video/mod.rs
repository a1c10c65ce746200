//! Video decoding capability shared by the request path and dataset tooling.
//!
//! Everything above this module talks to a [`SeekableVideo`]: stream metadata,
//! seek-to-keyframe, and sequential decode. Real files go through FFmpeg
//! (feature: video-ffmpeg); tests use the in-memory [`SyntheticVideo`].

use std::path::Path;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::error::PipelineError;

#[cfg(feature = "video-ffmpeg")]
mod file_ffmpeg;
pub mod sampler;
pub mod stride;
pub mod synthetic;

pub use sampler::{pick_indices, sample, sample_frames, SampledFrame};
pub use stride::{scan_every_n, stride_points};
pub use synthetic::SyntheticVideo;

/// Exact rational such as a frame rate (frames/second) or a time base
/// (seconds/tick).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rate {
    pub num: i64,
    pub den: i64,
}

impl Rate {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    pub fn is_positive(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

/// Container/stream metadata as reported by the decoder.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    /// Average frame rate. `None` when the container does not say.
    pub frame_rate: Option<Rate>,
    /// Frame count from the stream header, when present.
    pub frame_count: Option<u64>,
    /// Container duration in seconds, when present.
    pub duration_secs: Option<f64>,
    /// Seconds per presentation-timestamp tick.
    pub time_base: Rate,
}

impl VideoMetadata {
    /// Frame rate usable for index/time conversion.
    pub fn known_frame_rate(&self) -> Result<Rate> {
        match self.frame_rate {
            Some(rate) if rate.is_positive() => Ok(rate),
            _ => Err(PipelineError::UnknownFrameRate.into()),
        }
    }

    /// Header frame count, falling back to `duration * fps`.
    pub fn total_frames(&self) -> Result<u64> {
        let rate = self.known_frame_rate()?;
        if let Some(count) = self.frame_count.filter(|count| *count > 0) {
            return Ok(count);
        }
        match self.duration_secs {
            Some(secs) if secs.is_finite() && secs > 0.0 => {
                Ok((secs * rate.as_f64()).floor() as u64)
            }
            _ => Err(PipelineError::InvalidInput("can't determine video duration".into()).into()),
        }
    }

    /// Presentation timestamp, in time-base ticks, at which frame `index` starts.
    pub fn index_to_ticks(&self, index: u64) -> Result<i64> {
        let rate = self.known_frame_rate()?;
        let tb = self.time_base;
        if !tb.is_positive() {
            return Err(anyhow!("invalid stream time base {}/{}", tb.num, tb.den));
        }
        // index / fps / time_base, kept exact in integers
        let ticks = (index as i128 * rate.den as i128 * tb.den as i128)
            / (rate.num as i128 * tb.num as i128);
        i64::try_from(ticks).map_err(|_| anyhow!("frame {} timestamp overflows", index))
    }
}

#[derive(Clone, Debug)]
pub struct DecodedFrame {
    /// Presentation timestamp in time-base ticks, if the decoder reported one.
    pub pts: Option<i64>,
    pub image: RgbImage,
}

/// A video source that can jump to keyframes and decode forward from there.
pub trait SeekableVideo {
    fn metadata(&self) -> &VideoMetadata;

    /// Reposition at the last keyframe at or before `ticks`.
    ///
    /// The next [`SeekableVideo::next_frame`] call decodes from that keyframe.
    fn seek_keyframe(&mut self, ticks: i64) -> Result<()>;

    /// Decode the next frame in presentation order. `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>>;
}

/// How the HTTP surface opens an uploaded video.
pub type VideoOpener = fn(&Path) -> Result<Box<dyn SeekableVideo>>;

/// Open a local video file.
pub fn open_video(path: &Path) -> Result<Box<dyn SeekableVideo>> {
    #[cfg(feature = "video-ffmpeg")]
    {
        Ok(Box::new(file_ffmpeg::FfmpegVideo::open(path)?))
    }
    #[cfg(not(feature = "video-ffmpeg"))]
    {
        Err(anyhow!(
            "decoding {} requires the video-ffmpeg feature",
            path.display()
        ))
    }
}
