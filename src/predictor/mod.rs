//! Detection runner and its configuration.
//!
//! - [`DetectionRunner`] turns a single image into scored boxes in original
//!   image coordinates
//! - [`DetectionConfig`] holds the inference size, thresholds and input
//!   channel order

pub mod config;
pub mod detection_runner;

pub use config::DetectionConfig;
pub use detection_runner::{DetectionModel, DetectionRunner, ModuleModel};
