//! Error types for the feature pyramid and the detection runner.
//!
//! Every fallible operation in the crate returns [`DetError`]. Errors coming
//! out of candle are wrapped with the stage or model they occurred in so the
//! message says which layer of the graph failed, not just that a tensor
//! operation did.
//!
//! # Usage
//!
//! ```rust
//! use fpn_det::core::errors::{DetError, ProcessingStage};
//!
//! let error = DetError::tensor_operation(
//!     "Failed to reshape prediction tensor",
//!     std::io::Error::new(std::io::ErrorKind::InvalidData, "bad shape"),
//! );
//! assert!(matches!(
//!     error,
//!     DetError::Processing { kind: ProcessingStage::TensorOperation, .. }
//! ));
//!
//! let config_error = DetError::config_error("out_channels must not be empty");
//! assert!(config_error.to_string().contains("out_channels"));
//! ```

use thiserror::Error;

/// Stage of the pipeline an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Error occurred during tensor operations.
    TensorOperation,
    /// Error occurred while normalizing pixels into a tensor.
    Normalization,
    /// Error occurred during suppression or rescaling of detections.
    PostProcessing,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::TensorOperation => write!(f, "tensor operation"),
            ProcessingStage::Normalization => write!(f, "normalization"),
            ProcessingStage::PostProcessing => write!(f, "post-processing"),
        }
    }
}

/// Errors produced by the feature pyramid and the detection runner.
#[derive(Error, Debug)]
pub enum DetError {
    /// Error occurred while loading an image.
    #[error("image load")]
    ImageLoad(#[source] image::ImageError),

    /// Error occurred during processing.
    #[error("{kind} failed: {context}")]
    Processing {
        /// The stage of processing where the error occurred.
        kind: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error occurred while running a model or building its graph.
    #[error("{model_name} inference failed: {context}")]
    Inference {
        /// Name of the model or module that failed.
        model_name: String,
        /// Additional context about the error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error indicating a configuration problem.
    #[error("configuration: {message}")]
    ConfigError {
        /// A message describing the configuration error.
        message: String,
    },

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

/// Convenient result alias.
pub type DetResult<T> = Result<T, DetError>;

impl DetError {
    /// Creates a [`DetError`] for tensor operations.
    pub fn tensor_operation(
        context: &str,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::processing_error(ProcessingStage::TensorOperation, context, error)
    }

    /// Creates a [`DetError`] for processing operations in the given stage.
    pub fn processing_error(
        kind: ProcessingStage,
        context: &str,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            kind,
            context: context.to_string(),
            source: Box::new(error),
        }
    }

    /// Creates a [`DetError`] for a failure inside a model.
    pub fn inference_error(
        model_name: &str,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            model_name: model_name.to_string(),
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a [`DetError`] for invalid input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a [`DetError`] for configuration errors.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Creates a validation error naming the component, field and the mismatch.
    pub fn validation_error(component: &str, field: &str, expected: &str, actual: &str) -> Self {
        Self::InvalidInput {
            message: format!(
                "Validation failed in {}: field '{}' expected {}, but got '{}'",
                component, field, expected, actual
            ),
        }
    }
}

impl From<image::ImageError> for DetError {
    fn from(error: image::ImageError) -> Self {
        Self::ImageLoad(error)
    }
}

impl From<crate::core::config::ConfigError> for DetError {
    fn from(error: crate::core::config::ConfigError) -> Self {
        Self::ConfigError {
            message: error.to_string(),
        }
    }
}

/// Convert a candle error raised while running a model into a [`DetError`].
pub fn candle_to_inference(
    model_name: &str,
    context: impl Into<String>,
    err: candle_core::Error,
) -> DetError {
    DetError::Inference {
        model_name: model_name.to_string(),
        context: context.into(),
        source: Box::new(err),
    }
}

/// Convert a candle error raised by a pre/post-processing step into a [`DetError`].
pub fn candle_to_processing(
    kind: ProcessingStage,
    context: impl Into<String>,
    err: candle_core::Error,
) -> DetError {
    DetError::Processing {
        kind,
        context: context.into(),
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_display_includes_stage() {
        let err = DetError::processing_error(
            ProcessingStage::PostProcessing,
            "rescale",
            std::io::Error::new(std::io::ErrorKind::InvalidData, "nan"),
        );
        assert_eq!(err.to_string(), "post-processing failed: rescale");
    }

    #[test]
    fn test_candle_error_is_wrapped_with_model_name() {
        let err = candle_to_inference("FPN", "level 1 lateral", candle_core::Error::Msg("boom".into()));
        let message = err.to_string();
        assert!(message.contains("FPN"));
        assert!(message.contains("level 1 lateral"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error_conversion() {
        let err: DetError = crate::core::config::ConfigError::InvalidConfig {
            message: "reps".to_string(),
        }
        .into();
        assert!(matches!(err, DetError::ConfigError { .. }));
    }
}
