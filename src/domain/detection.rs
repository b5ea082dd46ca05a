//! Detection records returned by the runner.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Number of columns in the array form of a detection.
pub const DETECTION_COLUMNS: usize = 6;

/// One detected box in `(x1, y1, x2, y2)` corner form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: usize) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    /// The detection as an `[x1, y1, x2, y2, confidence, class_id]` row.
    pub fn to_row(&self) -> [f32; DETECTION_COLUMNS] {
        [
            self.x1,
            self.y1,
            self.x2,
            self.y2,
            self.confidence,
            self.class_id as f32,
        ]
    }
}

/// Detections for one image. Empty when nothing survived suppression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Detections(Vec<Detection>);

impl Detections {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self(detections)
    }

    /// Array form with one `[x1, y1, x2, y2, confidence, class_id]` row per
    /// detection; shape `(0, 6)` when empty.
    pub fn to_array(&self) -> Array2<f32> {
        let mut out = Array2::zeros((self.0.len(), DETECTION_COLUMNS));
        for (mut row, det) in out.rows_mut().into_iter().zip(&self.0) {
            for (dst, value) in row.iter_mut().zip(det.to_row()) {
                *dst = value;
            }
        }
        out
    }
}

impl std::ops::Deref for Detections {
    type Target = [Detection];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Detections {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<Detection>> for Detections {
    fn from(detections: Vec<Detection>) -> Self {
        Self(detections)
    }
}

impl FromIterator<Detection> for Detections {
    fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Detections {
    type Item = Detection;
    type IntoIter = std::vec::IntoIter<Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Detections {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
