//! Training-corpus helpers: exporting sampled frames and normalizing label
//! file names produced by the annotation tool.

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use std::path::{Path, PathBuf};

use crate::video::{sampler::sample_with_rng, SampledFrame};

/// `video{v}_frame{f}.png`
pub fn frame_file_name(video_number: usize, frame_number: usize) -> String {
    format!("video{}_frame{}.png", video_number, frame_number)
}

/// Write sampled frames as RGB PNGs into `out_dir`. Returns the written paths.
pub fn export_frames(
    frames: &[SampledFrame],
    video_number: usize,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(frames.len());
    for (frame_number, frame) in frames.iter().enumerate() {
        let path = out_dir.join(frame_file_name(video_number, frame_number));
        frame
            .image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

/// Regular files in `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Sample `count` frames from every video in `videos_dir` into `out_dir`.
pub fn export_video_samples<R: Rng + ?Sized>(
    videos_dir: &Path,
    out_dir: &Path,
    count: usize,
    rng: &mut R,
) -> Result<usize> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let mut total = 0;
    for (video_number, video) in list_files(videos_dir)?.iter().enumerate() {
        log::info!("processing video {} ({})", video_number, video.display());
        let frames = sample_with_rng(video, count, rng)?;
        total += export_frames(&frames, video_number, out_dir)?.len();
    }
    Ok(total)
}

/// New name for a label file exported as `<task>-<image>.txt`.
pub fn label_rename_target(file_name: &str) -> Option<&str> {
    if !file_name.ends_with(".txt") {
        return None;
    }
    file_name
        .split_once('-')
        .map(|(_, rest)| rest)
        .filter(|rest| !rest.is_empty())
}

/// Strip the `<task>-` prefix from every label file in `dir`.
pub fn rename_labels(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut renamed = Vec::new();
    for path in list_files(dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(target) = label_rename_target(name) else {
            continue;
        };
        let new_path = dir.join(target);
        std::fs::rename(&path, &new_path)
            .with_context(|| format!("failed to rename {} -> {}", name, target))?;
        log::info!("renamed: {} -> {}", name, target);
        renamed.push((name.to_string(), target.to_string()));
    }
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn label_targets_keep_text_after_first_hyphen() {
        assert_eq!(label_rename_target("12-video4_frame25.txt"), Some("video4_frame25.txt"));
        assert_eq!(label_rename_target("a-b-c.txt"), Some("b-c.txt"));
        assert_eq!(label_rename_target("video4_frame25.txt"), None);
        assert_eq!(label_rename_target("12-video4.png"), None);
    }

    #[test]
    fn rename_labels_only_touches_prefixed_txt_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("7-video0_frame1.txt"), "0 0.5 0.5 0.1 0.2").unwrap();
        std::fs::write(dir.path().join("plain.txt"), "").unwrap();
        std::fs::write(dir.path().join("1-image.png"), "").unwrap();

        let renamed = rename_labels(dir.path()).unwrap();
        assert_eq!(
            renamed,
            vec![("7-video0_frame1.txt".to_string(), "video0_frame1.txt".to_string())]
        );
        assert!(dir.path().join("video0_frame1.txt").exists());
        assert!(dir.path().join("1-image.png").exists());
    }

    #[test]
    fn exported_frames_are_numbered_per_video() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<SampledFrame> = (0..2)
            .map(|i| SampledFrame {
                index: i * 10,
                image: RgbImage::from_pixel(3, 3, Rgb([i as u8, 0, 0])),
            })
            .collect();
        let written = export_frames(&frames, 4, dir.path()).unwrap();
        assert_eq!(written[1], dir.path().join("video4_frame1.png"));
        let back = image::open(&written[1]).unwrap().to_rgb8();
        assert_eq!(back.get_pixel(0, 0).0, [1, 0, 0]);
    }
}
