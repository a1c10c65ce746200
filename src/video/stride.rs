use anyhow::Result;

use super::{DecodedFrame, SeekableVideo};

/// Number of frame indices `i < total` with `i % every_n == 0`.
pub fn stride_points(total: u64, every_n: usize) -> u64 {
    let step = every_n.max(1) as u64;
    total.div_ceil(step)
}

/// Decode `video` front to back and hand every `every_n`-th frame to `on_frame`,
/// stopping after `max_frames` kept frames or at end of stream.
///
/// `every_n` of zero behaves like one. Returns the number of frames kept.
pub fn scan_every_n<V, F>(
    video: &mut V,
    every_n: usize,
    max_frames: usize,
    mut on_frame: F,
) -> Result<usize>
where
    V: SeekableVideo + ?Sized,
    F: FnMut(u64, DecodedFrame) -> Result<()>,
{
    let step = every_n.max(1) as u64;
    let mut index = 0u64;
    let mut kept = 0usize;
    while kept < max_frames {
        let Some(frame) = video.next_frame()? else {
            break;
        };
        if index % step == 0 {
            on_frame(index, frame)?;
            kept += 1;
        }
        index += 1;
    }
    Ok(kept)
}
