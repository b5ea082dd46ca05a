use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::config::{ConfigError, ConfigValidator, load_json_config};
use crate::core::errors::DetError;
use crate::processors::ChannelOrder;

const DEFAULT_INPUT_SIZE: (u32, u32) = (320, 320);

const DEFAULT_CONF_THRESHOLD: f32 = 0.3;

const DEFAULT_NMS_THRESHOLD: f32 = 0.5;

fn default_input_size() -> (u32, u32) {
    DEFAULT_INPUT_SIZE
}

fn default_conf_threshold() -> f32 {
    DEFAULT_CONF_THRESHOLD
}

fn default_nms_threshold() -> f32 {
    DEFAULT_NMS_THRESHOLD
}

/// Configuration for the detection runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Inference canvas as `(width, height)`.
    #[serde(default = "default_input_size")]
    pub input_size: (u32, u32),
    /// Minimum confidence a candidate needs to survive.
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,
    /// IoU above which the weaker of two same-class boxes is dropped.
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
    /// Channel order of pixel arrays passed to `detect`.
    #[serde(default)]
    pub channel_order: ChannelOrder,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            channel_order: ChannelOrder::default(),
        }
    }
}

impl DetectionConfig {
    /// Sets the inference canvas as `(width, height)`.
    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = (width, height);
        self
    }

    /// Sets the minimum confidence a candidate needs.
    pub fn with_conf_threshold(mut self, threshold: f32) -> Self {
        self.conf_threshold = threshold;
        self
    }

    /// Sets the IoU above which overlapping same-class boxes are dropped.
    pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
        self.nms_threshold = threshold;
        self
    }

    pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
        self.channel_order = order;
        self
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DetError> {
        load_json_config(path)
    }
}

impl ConfigValidator for DetectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_positive("input_size.width", self.input_size.0 as usize)?;
        self.validate_positive("input_size.height", self.input_size.1 as usize)?;
        self.validate_threshold("conf_threshold", self.conf_threshold)?;
        self.validate_threshold("nms_threshold", self.nms_threshold)?;
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}
