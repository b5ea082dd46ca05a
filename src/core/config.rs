//! Configuration error types and validation traits.

use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::core::errors::DetError;

/// Errors that can occur during configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error indicating that a configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// A trait for validating configuration parameters.
pub trait ConfigValidator {
    /// Validates the configuration.
    fn validate(&self) -> Result<(), ConfigError>;

    /// Returns the default configuration.
    fn get_defaults() -> Self
    where
        Self: Sized;

    /// Validates that a count-like parameter is greater than zero.
    fn validate_positive(&self, field: &str, value: usize) -> Result<(), ConfigError> {
        if value == 0 {
            Err(ConfigError::InvalidConfig {
                message: format!("{field} must be greater than 0"),
            })
        } else {
            Ok(())
        }
    }

    /// Validates that a threshold lies in `[0, 1]`.
    fn validate_threshold(&self, field: &str, value: f32) -> Result<(), ConfigError> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::InvalidConfig {
                message: format!("{field} must be within [0, 1], got {value}"),
            });
        }
        Ok(())
    }
}

/// Reads a JSON configuration file and validates it.
pub fn load_json_config<T>(path: impl AsRef<Path>) -> Result<T, DetError>
where
    T: DeserializeOwned + ConfigValidator,
{
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let config: T = serde_json::from_str(&contents).map_err(|e| {
        DetError::config_error(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}
