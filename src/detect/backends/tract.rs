#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray::{Array4, ArrayD, IxDyn};
use tract_onnx::prelude::*;

use crate::detect::backend::ModelBackend;

/// Tract-based backend for ONNX inference.
///
/// Loads a local model file with a fixed `(1, 3, size, size)` input fact and
/// keeps the optimized plan for the lifetime of the process.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded ONNX model from {} (input {}x{})",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(Self { model, input_size })
    }

    fn build_input(&self, blob: &Array4<f32>) -> Result<Tensor> {
        let side = self.input_size as usize;
        if blob.shape() != [1, 3, side, side] {
            return Err(anyhow!(
                "blob shape {:?} does not match model input (1, 3, {}, {})",
                blob.shape(),
                side,
                side
            ));
        }
        let data = blob
            .as_slice()
            .ok_or_else(|| anyhow!("blob is not in standard layout"))?;
        Tensor::from_shape(&[1, 3, side, side], data).context("failed to build input tensor")
    }
}

impl ModelBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn run(&self, blob: &Array4<f32>) -> Result<ArrayD<f32>> {
        let input = self.build_input(blob)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        ArrayD::from_shape_vec(IxDyn(view.shape()), view.iter().copied().collect())
            .context("failed to copy model output")
    }
}
