//! Coordinate mapping between the inference canvas and the original image.

use crate::domain::{Detection, Detections};

/// Maps boxes from a `from_size` canvas back to a `to_size` image, both given
/// as `(width, height)`.
///
/// The inference input is a plain stretch of the original image, so each axis
/// scales independently. Coordinates are clipped to the target image and
/// rounded to whole pixels, halves to even; confidence and class are untouched.
///
/// ```
/// use fpn_det::domain::{Detection, Detections};
/// use fpn_det::processors::rescale_boxes;
///
/// let boxes = Detections::new(vec![Detection::new(0.0, 0.0, 320.0, 320.0, 0.9, 0)]);
/// let out = rescale_boxes((320, 320), boxes, (640, 480));
/// assert_eq!(out[0].to_row(), [0.0, 0.0, 640.0, 480.0, 0.9, 0.0]);
/// ```
pub fn rescale_boxes(from_size: (u32, u32), boxes: Detections, to_size: (u32, u32)) -> Detections {
    let (from_w, from_h) = from_size;
    let (to_w, to_h) = (to_size.0 as f32, to_size.1 as f32);
    if from_w == 0 || from_h == 0 {
        return boxes;
    }
    let gain_x = to_w / from_w as f32;
    let gain_y = to_h / from_h as f32;

    boxes
        .into_iter()
        .map(|det| {
            let map_x = |x: f32| (x * gain_x).clamp(0.0, to_w).round_ties_even();
            let map_y = |y: f32| (y * gain_y).clamp(0.0, to_h).round_ties_even();
            Detection {
                x1: map_x(det.x1),
                y1: map_y(det.y1),
                x2: map_x(det.x2),
                y2: map_y(det.y2),
                ..det
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_canvas_maps_to_full_image() {
        let boxes = Detections::new(vec![Detection::new(0.0, 0.0, 416.0, 256.0, 0.7, 3)]);
        let out = rescale_boxes((416, 256), boxes, (1280, 720));
        assert_eq!(out[0].to_row(), [0.0, 0.0, 1280.0, 720.0, 0.7, 3.0]);
    }

    #[test]
    fn test_axes_scale_independently_and_round() {
        let boxes = Detections::new(vec![Detection::new(10.0, 10.0, 33.3, 20.0, 0.5, 0)]);
        let out = rescale_boxes((100, 100), boxes, (300, 50));
        assert_eq!(out[0].x1, 30.0);
        assert_eq!(out[0].y1, 5.0);
        assert_eq!(out[0].x2, 100.0);
        assert_eq!(out[0].y2, 10.0);
    }

    #[test]
    fn test_half_pixels_round_to_even() {
        // gain 1.5: 3 -> 4.5, 1 -> 1.5, 5 -> 7.5, 7 -> 10.5
        let boxes = Detections::new(vec![Detection::new(3.0, 1.0, 5.0, 7.0, 0.9, 0)]);
        let out = rescale_boxes((320, 320), boxes, (480, 480));
        assert_eq!(out[0].to_row()[..4], [4.0, 2.0, 8.0, 10.0]);
    }

    #[test]
    fn test_boxes_are_clipped_to_image() {
        let boxes = Detections::new(vec![Detection::new(-5.0, -1.0, 120.0, 130.0, 0.5, 0)]);
        let out = rescale_boxes((100, 100), boxes, (200, 200));
        assert_eq!(out[0].to_row()[..4], [0.0, 0.0, 200.0, 200.0]);
    }

    #[test]
    fn test_empty_input_stays_empty() {
        assert!(rescale_boxes((320, 320), Detections::default(), (10, 10)).is_empty());
    }
}
