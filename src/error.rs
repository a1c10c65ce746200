//! Classified pipeline failures.
//!
//! Library code returns `anyhow::Result`; the variants below are raised through
//! it and recovered at the request boundary with `downcast_ref`, which also sees
//! through any `.context(..)` layers added on the way up.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// Undecodable upload or non-positive sizing parameter.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Model output the decoder cannot interpret.
    #[error("unexpected model output shape: {0}")]
    Shape(String),
    #[error("can't determine video frame rate")]
    UnknownFrameRate,
    #[error("requested {requested} frames but the video only has {total}")]
    InsufficientFrames { requested: usize, total: u64 },
}

/// Which side of the request boundary a failure belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Caller error. The message is safe to return verbatim.
    Client(String),
    /// Internal failure. Details stay in the server log.
    Server,
}

impl Fault {
    pub fn status(&self) -> u16 {
        match self {
            Fault::Client(_) => 400,
            Fault::Server => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Fault::Client(message) => message,
            Fault::Server => "internal error",
        }
    }
}

pub fn classify(err: &anyhow::Error) -> Fault {
    match err.downcast_ref::<PipelineError>() {
        Some(
            e @ (PipelineError::InvalidInput(_)
            | PipelineError::UnknownFrameRate
            | PipelineError::InsufficientFrames { .. }),
        ) => Fault::Client(e.to_string()),
        Some(PipelineError::Shape(_)) | None => Fault::Server,
    }
}
