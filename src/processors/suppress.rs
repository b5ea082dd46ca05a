//! Candidate filtering and non-maximum suppression of raw detector output.
//!
//! The overlap suppression itself is
//! [`candle_transformers::object_detection::non_maximum_suppression`]; this
//! module decodes raw prediction rows into candidate boxes and regroups the
//! survivors.

use candle_core::{DType, Tensor};
use candle_transformers::object_detection::{Bbox, non_maximum_suppression};
use tracing::debug;

use crate::core::errors::{DetError, ProcessingStage, candle_to_processing};
use crate::domain::{Detection, Detections};

/// Columns before the class scores: `cx, cy, w, h, objectness`.
pub const BOX_ATTRIBUTES: usize = 5;

/// Filters raw predictions and suppresses overlapping boxes.
///
/// `predictions` is `(batch, candidates, 4 + 1 + classes)`. The result holds
/// one entry per image, `None` when no candidate survived.
pub trait Suppressor: Send + Sync {
    fn suppress(
        &self,
        predictions: &Tensor,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<Option<Detections>>, DetError>;
}

/// YOLO-style decoding: rows are `(cx, cy, w, h, objectness, class scores…)`.
///
/// A candidate's confidence is `objectness × best class score`; it is kept
/// when strictly above the confidence threshold. Suppression runs per class.
#[derive(Debug, Clone)]
pub struct YoloSuppressor {
    max_detections: usize,
}

impl Default for YoloSuppressor {
    fn default() -> Self {
        Self {
            max_detections: 300,
        }
    }
}

impl YoloSuppressor {
    /// Creates a suppressor that keeps at most `max_detections` boxes per
    /// image, highest confidence first.
    pub fn new(max_detections: usize) -> Self {
        Self { max_detections }
    }

    fn suppress_image(
        &self,
        rows: &[Vec<f32>],
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Option<Detections> {
        let num_classes = rows
            .first()
            .map_or(0, |row| row.len().saturating_sub(BOX_ATTRIBUTES));
        if num_classes == 0 {
            return None;
        }

        let mut per_class: Vec<Vec<Bbox<()>>> = (0..num_classes).map(|_| Vec::new()).collect();
        let mut candidates = 0usize;
        for row in rows {
            if row.iter().any(|v| !v.is_finite()) {
                continue;
            }
            let Some((class_id, class_score)) = best_class(&row[BOX_ATTRIBUTES..]) else {
                continue;
            };
            let confidence = row[4] * class_score;
            if confidence <= conf_threshold {
                continue;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            per_class[class_id].push(Bbox {
                xmin: cx - w / 2.0,
                ymin: cy - h / 2.0,
                xmax: cx + w / 2.0,
                ymax: cy + h / 2.0,
                confidence,
                data: (),
            });
            candidates += 1;
        }

        non_maximum_suppression(&mut per_class, nms_threshold);

        let mut detections: Vec<Detection> = per_class
            .into_iter()
            .enumerate()
            .flat_map(|(class_id, boxes)| {
                boxes.into_iter().map(move |b| {
                    Detection::new(b.xmin, b.ymin, b.xmax, b.ymax, b.confidence, class_id)
                })
            })
            .collect();
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections.truncate(self.max_detections);

        debug!(
            rows = rows.len(),
            candidates,
            kept = detections.len(),
            "suppressed predictions"
        );

        if detections.is_empty() {
            None
        } else {
            Some(Detections::new(detections))
        }
    }
}

fn best_class(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
}

impl Suppressor for YoloSuppressor {
    fn suppress(
        &self,
        predictions: &Tensor,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<Option<Detections>>, DetError> {
        let predictions: Vec<Vec<Vec<f32>>> = predictions
            .to_dtype(DType::F32)
            .and_then(|t| t.to_vec3())
            .map_err(|e| {
                candle_to_processing(
                    ProcessingStage::PostProcessing,
                    "predictions must be a (batch, candidates, attributes) tensor",
                    e,
                )
            })?;

        Ok(predictions
            .iter()
            .map(|rows| self.suppress_image(rows, conf_threshold, nms_threshold))
            .collect())
    }
}
