//! Single-image inference: letterbox, run the model, decode, rescale.

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use super::backend::ModelBackend;
use super::decode::OutputDecoder;
use super::letterbox::letterbox;
use super::result::{Detection, LabelTable};
use crate::error::PipelineError;

/// Detections for one image plus the image's own dimensions.
#[derive(Clone, Debug)]
pub struct Inference {
    pub detections: Vec<Detection>,
    pub width: u32,
    pub height: u32,
}

/// Composes the preprocessing, model and decoding stages.
///
/// Cloning is cheap: the model handle is shared, never copied.
#[derive(Clone)]
pub struct Detector {
    backend: Arc<dyn ModelBackend>,
    decoder: OutputDecoder,
}

impl Detector {
    pub fn new(backend: Arc<dyn ModelBackend>, labels: LabelTable) -> Self {
        Self {
            backend,
            decoder: OutputDecoder::new(labels),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn input_size(&self) -> u32 {
        self.backend.input_size()
    }

    /// Run the full pipeline on one RGB image.
    ///
    /// Boxes come back in the image's own pixel space. Errors from any stage
    /// propagate unchanged.
    pub fn infer(&self, image: &RgbImage, conf_threshold: f32) -> Result<Inference> {
        if !conf_threshold.is_finite() {
            return Err(PipelineError::InvalidInput(format!(
                "confidence threshold {} is not a number",
                conf_threshold
            ))
            .into());
        }
        let input = letterbox(image, self.backend.input_size())?;
        let output = self.backend.run(&input.blob)?;
        let detections = self
            .decoder
            .decode(output.view(), input.scale, conf_threshold)?;

        let (width, height) = image.dimensions();
        Ok(Inference {
            detections,
            width,
            height,
        })
    }

    /// Decode a compressed upload, then [`Detector::infer`].
    pub fn infer_encoded(&self, bytes: &[u8], conf_threshold: f32) -> Result<Inference> {
        let image = decode_image(bytes)?;
        self.infer(&image, conf_threshold)
    }
}

/// Decode a compressed image buffer into RGB pixels.
///
/// Malformed bytes and a well-formed zero-area image are reported separately.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::InvalidInput(format!("invalid image: {}", e)))?;
    let rgb = decoded.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(PipelineError::InvalidInput(format!(
            "image has zero area ({}x{})",
            rgb.width(),
            rgb.height()
        ))
        .into());
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use image::Rgb;
    use ndarray::{Array3, Array4, ArrayD};

    fn stub_detector(size: u32, output: Array3<f32>) -> Detector {
        Detector::new(
            Arc::new(StubBackend::new(size, output.into_dyn())),
            LabelTable::default(),
        )
    }

    #[test]
    fn boxes_are_reported_in_source_pixels() {
        // 200x100 image into a 100 canvas: scale 0.5.
        let output = Array3::from_shape_vec((1, 1, 5), vec![50.0, 25.0, 20.0, 10.0, 0.8]).unwrap();
        let detector = stub_detector(100, output);
        let image = RgbImage::from_pixel(200, 100, Rgb([1, 2, 3]));

        let result = detector.infer(&image, 0.25).unwrap();
        assert_eq!((result.width, result.height), (200, 100));
        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.detections[0].bbox.to_array(), [80.0, 40.0, 120.0, 60.0]);
    }

    #[test]
    fn threshold_is_applied_per_call() {
        let output = Array3::from_shape_vec((1, 1, 5), vec![5.0, 5.0, 2.0, 2.0, 0.3]).unwrap();
        let detector = stub_detector(16, output);
        let image = RgbImage::new(16, 16);
        assert_eq!(detector.infer(&image, 0.25).unwrap().detections.len(), 1);
        assert!(detector.infer(&image, 0.5).unwrap().detections.is_empty());
        assert_eq!(detector.infer(&image, 0.25).unwrap().detections.len(), 1);
    }

    #[test]
    fn model_shape_errors_propagate() {
        struct FlatBackend;
        impl ModelBackend for FlatBackend {
            fn name(&self) -> &'static str {
                "flat"
            }
            fn input_size(&self) -> u32 {
                8
            }
            fn run(&self, _blob: &Array4<f32>) -> Result<ArrayD<f32>> {
                Ok(ArrayD::zeros(ndarray::IxDyn(&[6, 4])))
            }
        }

        let detector = Detector::new(Arc::new(FlatBackend), LabelTable::default());
        let err = detector.infer(&RgbImage::new(8, 8), 0.25).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Shape(_))
        ));
    }

    #[test]
    fn garbage_bytes_are_invalid_input() {
        let err = decode_image(b"definitely not a png").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn encoded_png_round_trips_into_inference() {
        let image = RgbImage::from_pixel(12, 6, Rgb([9, 9, 9]));
        let mut png = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let detector = Detector::new(Arc::new(StubBackend::empty(32)), LabelTable::default());
        let result = detector.infer_encoded(&png, 0.25).unwrap();
        assert_eq!((result.width, result.height), (12, 6));
        assert!(result.detections.is_empty());
    }
}
