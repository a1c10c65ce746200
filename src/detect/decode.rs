//! Model output decoding.
//!
//! Exported YOLO heads emit `(1, A, B)` where one of `A`/`B` enumerates
//! candidates and the other enumerates per-candidate channels. Which one is
//! which depends on the exporter, so the layout is resolved from the channel
//! width alone: exactly one axis has a width in [`CHANNEL_WIDTHS`].
//!
//! No non-maximum suppression happens here. Overlapping candidates for the
//! same object are all returned, in tensor row order.

use anyhow::Result;
use ndarray::{s, ArrayView1, ArrayView2, ArrayViewD, Axis, Ix3};

use super::result::{BoundingBox, Detection, LabelTable};
use crate::error::PipelineError;

/// Channel counts produced by the supported heads: single-class with and
/// without objectness, single-class with one class score, and 80-class COCO.
pub const CHANNEL_WIDTHS: [usize; 4] = [5, 6, 7, 84];

pub const DEFAULT_CONFIDENCE: f32 = 0.25;

/// True when an axis of this width is the channel axis.
pub fn is_channel_width(width: usize) -> bool {
    CHANNEL_WIDTHS.contains(&width)
}

/// Axis order of the two non-batch dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelLayout {
    /// `(1, C, N)`
    ChannelsFirst,
    /// `(1, N, C)`
    CandidatesFirst,
}

impl ChannelLayout {
    /// Resolve from the `(A, B)` extents of a `(1, A, B)` tensor.
    pub fn detect(a: usize, _b: usize) -> Self {
        if is_channel_width(a) {
            ChannelLayout::ChannelsFirst
        } else {
            ChannelLayout::CandidatesFirst
        }
    }

    /// View the tensor body as `(N, C)` rows.
    fn rows<'a>(self, body: ArrayView2<'a, f32>) -> ArrayView2<'a, f32> {
        match self {
            ChannelLayout::ChannelsFirst => body.reversed_axes(),
            ChannelLayout::CandidatesFirst => body,
        }
    }
}

/// One decoded row, still in letterboxed-canvas units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// (center_x, center_y, width, height)
    pub cxcywh: [f32; 4],
    pub confidence: f32,
    pub class_id: usize,
}

impl Candidate {
    /// Interpret one channel row. `None` for widths no head produces.
    pub fn from_row(row: ArrayView1<'_, f32>) -> Option<Self> {
        let channels = row.len();
        if channels < 5 {
            return None;
        }
        let cxcywh = [row[0], row[1], row[2], row[3]];
        let objectness = row[4];

        let (confidence, class_id) = match channels {
            5 | 6 => (objectness, 0),
            _ => {
                let (class_id, class_score) = argmax(row.slice(s![5..]));
                (objectness * class_score, class_id)
            }
        };

        Some(Self {
            cxcywh,
            confidence,
            class_id,
        })
    }

    pub fn bbox(&self) -> BoundingBox {
        let [cx, cy, w, h] = self.cxcywh;
        BoundingBox::from_center(cx, cy, w, h)
    }
}

/// First index of the largest score.
fn argmax(scores: ArrayView1<'_, f32>) -> (usize, f32) {
    scores
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (idx, score)| {
            if score > best.1 {
                (idx, score)
            } else {
                best
            }
        })
}

/// Decoder bound to a label table.
#[derive(Clone, Debug, Default)]
pub struct OutputDecoder {
    labels: LabelTable,
}

impl OutputDecoder {
    pub fn new(labels: LabelTable) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// All rows of `tensor` with confidence `>= conf_threshold`, in row order.
    pub fn candidates(
        &self,
        tensor: ArrayViewD<'_, f32>,
        conf_threshold: f32,
    ) -> Result<Vec<Candidate>> {
        let shape = tensor.shape().to_vec();
        let tensor = tensor.into_dimensionality::<Ix3>().map_err(|_| {
            PipelineError::Shape(format!(
                "expected rank 3 output, got rank {} {:?}",
                shape.len(),
                shape
            ))
        })?;
        if tensor.len_of(Axis(0)) != 1 {
            return Err(PipelineError::Shape(format!(
                "expected batch size 1, got shape {:?}",
                shape
            ))
            .into());
        }

        let layout = ChannelLayout::detect(shape[1], shape[2]);
        let rows = layout.rows(tensor.index_axis_move(Axis(0), 0));

        let kept = rows
            .outer_iter()
            .filter_map(Candidate::from_row)
            .filter(|c| c.confidence >= conf_threshold)
            .collect();
        Ok(kept)
    }

    /// Decode, threshold and map boxes back to source-image pixels.
    pub fn decode(
        &self,
        tensor: ArrayViewD<'_, f32>,
        scale: f32,
        conf_threshold: f32,
    ) -> Result<Vec<Detection>> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(
                PipelineError::InvalidInput(format!("letterbox scale {} is not positive", scale))
                    .into(),
            );
        }

        let detections = self
            .candidates(tensor, conf_threshold)?
            .into_iter()
            .map(|c| Detection {
                bbox: c.bbox().unscale(scale),
                confidence: c.confidence,
                class_id: c.class_id,
                label: self.labels.resolve(c.class_id),
            })
            .collect();
        Ok(detections)
    }
}
