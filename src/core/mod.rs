//! Core building blocks shared by the feature pyramid and the detection runner.
//!
//! - Error handling ([`DetError`], [`ProcessingStage`])
//! - Configuration validation ([`ConfigValidator`], [`ConfigError`])

pub mod config;
pub mod errors;

pub use config::{ConfigError, ConfigValidator, load_json_config};
pub use errors::{DetError, DetResult, ProcessingStage, candle_to_inference, candle_to_processing};

