use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use super::backend::ModelBackend;

pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

/// Load the process-wide model handle from an ONNX file.
pub fn load_backend(model_path: &Path, input_size: u32) -> Result<Arc<dyn ModelBackend>> {
    #[cfg(feature = "backend-tract")]
    {
        Ok(Arc::new(TractBackend::new(model_path, input_size)?))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        let _ = input_size;
        Err(anyhow::anyhow!(
            "loading {} requires the backend-tract feature",
            model_path.display()
        ))
    }
}
