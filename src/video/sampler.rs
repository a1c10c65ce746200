//! Random frame sampling for dataset construction.
//!
//! Picks are sorted ascending so consecutive seeks only ever move forward.
//! Each pick is a coarse seek to the preceding keyframe followed by a linear
//! decode until the presentation timestamp reaches the target.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use rand::Rng;

use super::{open_video, SeekableVideo};
use crate::error::PipelineError;

#[derive(Clone, Debug)]
pub struct SampledFrame {
    /// Frame index the sample was requested for.
    pub index: u64,
    pub image: RgbImage,
}

/// `count` distinct indices from `[0, total)`, ascending.
pub fn pick_indices<R: Rng + ?Sized>(total: u64, count: usize, rng: &mut R) -> Result<Vec<u64>> {
    if count as u64 > total {
        return Err(PipelineError::InsufficientFrames {
            requested: count,
            total,
        }
        .into());
    }
    let length = usize::try_from(total).context("frame count does not fit in memory")?;
    let mut picks: Vec<u64> = rand::seq::index::sample(rng, length, count)
        .into_iter()
        .map(|idx| idx as u64)
        .collect();
    picks.sort_unstable();
    Ok(picks)
}

/// Decode `count` randomly chosen, distinct frames from `video`.
///
/// Fails without returning a partial set if any pick cannot be decoded.
pub fn sample_frames<V, R>(video: &mut V, count: usize, rng: &mut R) -> Result<Vec<SampledFrame>>
where
    V: SeekableVideo + ?Sized,
    R: Rng + ?Sized,
{
    let metadata = video.metadata().clone();
    let total = metadata.total_frames()?;
    let picks = pick_indices(total, count, rng)?;
    log::debug!("sampling {} of {} frames: {:?}", count, total, picks);

    let mut out = Vec::with_capacity(picks.len());
    for index in picks {
        let target = metadata.index_to_ticks(index)?;
        video
            .seek_keyframe(target)
            .with_context(|| format!("seek to frame {}", index))?;
        let image = decode_until(video, target)?
            .ok_or_else(|| anyhow!("video ended before frame {}", index))?;
        out.push(SampledFrame { index, image });
    }
    Ok(out)
}

/// Decode forward to the first frame whose pts is at or past `target`.
fn decode_until<V: SeekableVideo + ?Sized>(video: &mut V, target: i64) -> Result<Option<RgbImage>> {
    while let Some(frame) = video.next_frame()? {
        match frame.pts {
            Some(pts) if pts >= target => return Ok(Some(frame.image)),
            _ => continue,
        }
    }
    Ok(None)
}

/// Open `path`, sample `count` random frames, close the file.
pub fn sample(path: &Path, count: usize) -> Result<Vec<SampledFrame>> {
    sample_with_rng(path, count, &mut rand::thread_rng())
}

pub fn sample_with_rng<R: Rng + ?Sized>(
    path: &Path,
    count: usize,
    rng: &mut R,
) -> Result<Vec<SampledFrame>> {
    let mut video = open_video(path)?;
    sample_frames(video.as_mut(), count, rng)
        .with_context(|| format!("sampling {} frames from {}", count, path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::SyntheticVideo;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn picks_are_distinct_ascending_and_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let picks = pick_indices(10, 3, &mut rng).unwrap();
        assert_eq!(picks.len(), 3);
        assert!(picks.windows(2).all(|w| w[0] < w[1]));
        assert!(picks.iter().all(|p| *p < 10));
    }

    #[test]
    fn same_seed_same_picks() {
        let a = pick_indices(1000, 5, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = pick_indices(1000, 5, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn asking_for_too_many_frames_fails() {
        let mut video = SyntheticVideo::new(10, 10, 4);
        let err = sample_frames(&mut video, 11, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::InsufficientFrames {
                requested: 11,
                total: 10
            })
        );
        assert_eq!(video.frames_decoded(), 0);
    }

    #[test]
    fn every_frame_can_be_taken() {
        let mut video = SyntheticVideo::new(10, 10, 4);
        let frames = sample_frames(&mut video, 10, &mut StdRng::seed_from_u64(3)).unwrap();
        let indices: Vec<u64> = frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn seek_then_scan_returns_the_requested_frame() {
        let mut video = SyntheticVideo::new(200, 25, 30);
        let frames = sample_frames(&mut video, 6, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(frames.len(), 6);
        for frame in &frames {
            assert_eq!(
                SyntheticVideo::frame_marker(&frame.image) as u64,
                frame.index % 256
            );
        }
        // keyframe seeks bound the linear scan
        assert!(video.frames_decoded() <= 6 * 30);
    }

    #[test]
    fn duration_fallback_drives_sampling() {
        let mut video = SyntheticVideo::new(40, 20, 5).without_frame_count();
        let frames = sample_frames(&mut video, 4, &mut StdRng::seed_from_u64(5)).unwrap();
        assert!(frames.iter().all(|f| f.index < 40));
    }

    #[test]
    fn unknown_frame_rate_fails_before_decoding() {
        let mut video = SyntheticVideo::new(40, 20, 5).without_frame_rate();
        let err = sample_frames(&mut video, 1, &mut StdRng::seed_from_u64(5)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::UnknownFrameRate)
        );
    }
}
