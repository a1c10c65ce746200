use anyhow::Result;
use image::{Rgb, RgbImage};

use super::{DecodedFrame, Rate, SeekableVideo, VideoMetadata};

/// Ticks per frame in the synthetic time base.
const TICKS_PER_FRAME: i64 = 100;

/// In-memory video with a fixed keyframe spacing.
///
/// Frame `i` is a small solid image whose red channel is `i % 256`, so callers
/// can tell which frame they got. Seeking behaves like a real container: it
/// lands on the last keyframe at or before the target and decoding resumes from
/// there.
pub struct SyntheticVideo {
    metadata: VideoMetadata,
    frames: u64,
    keyframe_interval: u64,
    width: u32,
    height: u32,
    position: u64,
    decoded: u64,
}

impl SyntheticVideo {
    pub fn new(frames: u64, fps: i64, keyframe_interval: u64) -> Self {
        Self {
            metadata: VideoMetadata {
                frame_rate: Some(Rate::new(fps, 1)),
                frame_count: Some(frames),
                duration_secs: Some(frames as f64 / fps.max(1) as f64),
                time_base: Rate::new(1, fps.max(1) * TICKS_PER_FRAME),
            },
            frames,
            keyframe_interval: keyframe_interval.max(1),
            width: 4,
            height: 2,
            position: 0,
            decoded: 0,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Drop the header frame count so callers must derive it from duration.
    pub fn without_frame_count(mut self) -> Self {
        self.metadata.frame_count = None;
        self
    }

    pub fn without_frame_rate(mut self) -> Self {
        self.metadata.frame_rate = None;
        self
    }

    /// Total frames decoded so far, across all seeks.
    pub fn frames_decoded(&self) -> u64 {
        self.decoded
    }

    /// Red channel value that identifies a decoded frame.
    pub fn frame_marker(image: &RgbImage) -> u8 {
        image.get_pixel(0, 0)[0]
    }
}

impl SeekableVideo for SyntheticVideo {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn seek_keyframe(&mut self, ticks: i64) -> Result<()> {
        let target = (ticks.max(0) / TICKS_PER_FRAME) as u64;
        let target = target.min(self.frames.saturating_sub(1));
        self.position = target - target % self.keyframe_interval;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        if self.position >= self.frames {
            return Ok(None);
        }
        let index = self.position;
        self.position += 1;
        self.decoded += 1;
        let marker = (index % 256) as u8;
        Ok(Some(DecodedFrame {
            pts: Some(index as i64 * TICKS_PER_FRAME),
            image: RgbImage::from_pixel(self.width, self.height, Rgb([marker, 0, 255 - marker])),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_lands_on_preceding_keyframe() {
        let mut video = SyntheticVideo::new(50, 10, 12);
        let ticks = video.metadata().index_to_ticks(30).unwrap();
        video.seek_keyframe(ticks).unwrap();
        let frame = video.next_frame().unwrap().unwrap();
        assert_eq!(SyntheticVideo::frame_marker(&frame.image), 24);
    }

    #[test]
    fn sequential_decode_ends_cleanly() {
        let mut video = SyntheticVideo::new(3, 10, 1);
        let mut seen = 0;
        while video.next_frame().unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert!(video.next_frame().unwrap().is_none());
    }
}
