//! IceVision: player detection on ice-hockey imagery.
//!
//! # Pipeline
//!
//! 1. **Letterbox** (`detect::letterbox`): aspect-preserving resize onto a
//!    square, top-left anchored canvas, plus the scale needed to undo it.
//! 2. **Model** (`detect::ModelBackend`): loaded once, shared read-only.
//! 3. **Decode** (`detect::decode`): axis-order normalization, confidence
//!    filtering, center→corner conversion, rescale to source pixels.
//!    Duplicates are not suppressed (no NMS).
//!
//! `detect::Detector` composes the three for one image. `video` provides the
//! seekable decoder capability used both by the `/predict_video` endpoint and
//! by the random frame sampler that builds training sets.
//!
//! # Module Structure
//!
//! - `api`: HTTP surface on a std `TcpListener`
//! - `config`: file + env configuration for the service
//! - `dataset`: corpus tooling (frame export, label renaming)
//! - `error`: classified failures and client/server fault mapping

pub mod api;
pub mod config;
pub mod dataset;
pub mod detect;
pub mod error;
pub mod video;

pub use detect::{
    BoundingBox, Detection, DetectionRecord, Detector, Inference, LabelTable, ModelBackend,
    OutputDecoder, StubBackend,
};
pub use error::{classify, Fault, PipelineError};
pub use video::{open_video, SampledFrame, SeekableVideo, SyntheticVideo, VideoMetadata};
