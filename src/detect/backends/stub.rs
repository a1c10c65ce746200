use anyhow::{anyhow, Result};
use ndarray::{Array4, ArrayD};

use crate::detect::backend::ModelBackend;

/// Stub backend for testing. Ignores pixel content and returns a preset output.
pub struct StubBackend {
    input_size: u32,
    output: ArrayD<f32>,
}

impl StubBackend {
    pub fn new(input_size: u32, output: ArrayD<f32>) -> Self {
        Self { input_size, output }
    }

    /// A `(1, 5, 0)` output: a single-class head with no candidates.
    pub fn empty(input_size: u32) -> Self {
        Self::new(input_size, ArrayD::zeros(ndarray::IxDyn(&[1, 5, 0])))
    }
}

impl ModelBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn run(&self, blob: &Array4<f32>) -> Result<ArrayD<f32>> {
        let side = self.input_size as usize;
        if blob.shape() != [1, 3, side, side] {
            return Err(anyhow!(
                "blob shape {:?} does not match stub input (1, 3, {}, {})",
                blob.shape(),
                side,
                side
            ));
        }
        Ok(self.output.clone())
    }
}
