mod backend;
pub mod backends;
pub mod decode;
pub mod letterbox;
mod pipeline;
mod result;

pub use backend::ModelBackend;
pub use backends::{load_backend, StubBackend};
pub use decode::{ChannelLayout, OutputDecoder, DEFAULT_CONFIDENCE};
pub use letterbox::{letterbox, Letterboxed, PAD_VALUE};
pub use pipeline::{decode_image, Detector, Inference};
pub use result::{BoundingBox, Detection, DetectionRecord, LabelTable};
