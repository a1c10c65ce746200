use anyhow::Result;
use ndarray::{Array4, ArrayD};

/// Model execution backend.
///
/// A backend is loaded once at startup and never mutated afterwards, so `run`
/// takes `&self` and the handle is shared across request workers as an
/// `Arc<dyn ModelBackend>` without locking.
pub trait ModelBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Side length of the square input the model was exported for.
    fn input_size(&self) -> u32;

    /// Run the model on a `(1, 3, size, size)` blob and return its first output.
    ///
    /// The output is returned as-is; interpreting its shape is the decoder's job.
    fn run(&self, blob: &Array4<f32>) -> Result<ArrayD<f32>>;
}
