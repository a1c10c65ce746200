use serde::Serialize;

/// Box corners in original-image pixel units.
///
/// Not clamped to the image: boxes may extend slightly past the borders.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Corners from a (center_x, center_y, width, height) encoding.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    /// Divide every coordinate by `scale` to undo a letterbox resize.
    pub fn unscale(self, scale: f32) -> Self {
        Self {
            x1: self.x1 / scale,
            y1: self.y1 / scale,
            x2: self.x2 / scale,
            y2: self.y2 / scale,
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
    pub label: String,
}

/// Wire form used by the HTTP surface and the `predict` tool.
#[derive(Clone, Debug, Serialize)]
pub struct DetectionRecord {
    pub xyxy: [f32; 4],
    pub conf: f32,
    pub cls: usize,
    pub label: String,
}

impl From<&Detection> for DetectionRecord {
    fn from(d: &Detection) -> Self {
        Self {
            xyxy: d.bbox.to_array(),
            conf: d.confidence,
            cls: d.class_id,
            label: d.label.clone(),
        }
    }
}

/// Fixed class-id → name table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Out-of-range ids resolve to their decimal form.
    pub fn resolve(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::new(["player"])
    }
}
