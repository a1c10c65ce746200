//! Aspect-preserving resize onto a fixed square canvas.
//!
//! Content is pasted at the top-left origin, not centered. Training-time
//! preprocessing used the same placement, so boxes decoded from the canvas
//! only need a division by `scale` to land back in source pixels.

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;

use crate::error::PipelineError;

/// Gray level used for canvas area not covered by the image.
pub const PAD_VALUE: u8 = 114;

/// Model-ready input plus what is needed to invert the transform.
#[derive(Clone, Debug)]
pub struct Letterboxed {
    /// `(1, 3, size, size)`, channel-first, values in `[0, 1]`.
    pub blob: Array4<f32>,
    /// Uniform factor applied to both axes.
    pub scale: f32,
    /// Extent of the resized image inside the canvas.
    pub content_width: u32,
    pub content_height: u32,
}

/// Resize `image` into a `size`×`size` canvas padded with [`PAD_VALUE`].
///
/// Returns the canvas and the scale factor `min(size/H, size/W)`.
pub fn letterbox_canvas(image: &RgbImage, size: u32) -> Result<(RgbImage, f32, u32, u32)> {
    if size == 0 {
        return Err(PipelineError::InvalidInput("letterbox size must be positive".into()).into());
    }
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidInput(format!(
            "image has zero area ({}x{})",
            width, height
        ))
        .into());
    }

    let scale = f64::min(size as f64 / height as f64, size as f64 / width as f64);
    let new_w = scaled_extent(width, scale, size);
    let new_h = scaled_extent(height, scale, size);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    if (new_w, new_h) == (width, height) {
        imageops::replace(&mut canvas, image, 0, 0);
    } else {
        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
        imageops::replace(&mut canvas, &resized, 0, 0);
    }

    Ok((canvas, scale as f32, new_w, new_h))
}

/// Full preprocessing step: canvas, then normalized CHW blob with batch axis.
pub fn letterbox(image: &RgbImage, size: u32) -> Result<Letterboxed> {
    let (canvas, scale, content_width, content_height) = letterbox_canvas(image, size)?;
    let side = size as usize;
    let raw = canvas.as_raw();
    let blob = Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
        raw[(y * side + x) * 3 + channel] as f32 / 255.0
    });

    Ok(Letterboxed {
        blob,
        scale,
        content_width,
        content_height,
    })
}

fn scaled_extent(extent: u32, scale: f64, size: u32) -> u32 {
    ((extent as f64 * scale).round() as u32).clamp(1, size)
}
