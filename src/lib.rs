//! # fpn-det
//!
//! A feature pyramid neck for convolutional object detectors, plus a
//! single-image detection runner built on [candle](https://github.com/huggingface/candle).
//!
//! ## Modules
//!
//! * [`core`] - Error handling and configuration validation
//! * [`domain`] - Detection records
//! * [`models`] - Conv/BN/activation blocks and the [`models::FeaturePyramid`]
//! * [`predictor`] - The [`predictor::DetectionRunner`] and its configuration
//! * [`processors`] - Preprocessing, suppression and box rescaling
//! * [`utils`] - Device selection, image loading and tensor helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use candle_core::{Device, Module, Tensor};
//! use fpn_det::prelude::*;
//! use std::path::Path;
//!
//! // Any candle module mapping (1, 3, H, W) to (1, N, 5 + classes).
//! struct MyDetector;
//!
//! impl Module for MyDetector {
//!     fn forward(&self, _xs: &Tensor) -> candle_core::Result<Tensor> {
//!         Tensor::zeros((1, 0, 85), candle_core::DType::F32, &Device::Cpu)
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = ModuleModel::new(MyDetector, "my-detector");
//! let runner = DetectionRunner::with_default_suppressor(
//!     model,
//!     DetectionConfig::default(),
//!     Device::Cpu,
//! )?;
//!
//! let image = load_image(Path::new("street.jpg"))?;
//! for det in &runner.detect_rgb(&image)? {
//!     println!("{} {:.2} [{}, {}, {}, {}]", det.class_id, det.confidence, det.x1, det.y1, det.x2, det.y2);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod domain;
pub mod models;
pub mod predictor;
pub mod processors;
pub mod utils;

/// Prelude module for convenient imports.
///
/// ```rust
/// use fpn_det::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{DetError, DetResult};
    pub use crate::domain::{Detection, Detections};
    pub use crate::models::{ConcatMode, FeaturePyramid, FpnConfig};
    pub use crate::predictor::{DetectionConfig, DetectionModel, DetectionRunner, ModuleModel};
    pub use crate::processors::{ChannelOrder, Suppressor, YoloSuppressor};
    pub use crate::utils::load_image;
}
