//! Domain types shared by the runner and its post-processing.

pub mod detection;

pub use detection::{DETECTION_COLUMNS, Detection, Detections};
