use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::config::{ConfigError, ConfigValidator, load_json_config};
use crate::core::errors::DetError;
use crate::models::layers::DEFAULT_BN_EPS;

fn default_out_channels() -> Vec<usize> {
    vec![512, 256, 128]
}

fn default_reps() -> usize {
    3
}

fn default_bn_eps() -> f64 {
    DEFAULT_BN_EPS
}

/// How a level joins the upsampled coarse feature with its own projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcatMode {
    /// Plain channel concatenation.
    #[default]
    Plain,
    /// Concatenation that also records per-level value ranges, for
    /// quantization calibration.
    Calibrating,
}

/// Construction parameters of a [`FeaturePyramid`](super::FeaturePyramid).
///
/// `channels_list` and `out_channels` are ordered from the highest
/// (coarsest) backbone level to the lowest (finest).
///
/// ```
/// use fpn_det::models::fpn::FpnConfig;
///
/// let cfg: FpnConfig = serde_json::from_str(r#"{ "channels_list": [256, 128, 64] }"#).unwrap();
/// assert_eq!(cfg.out_channels, vec![512, 256, 128]);
/// assert_eq!(cfg.reps, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FpnConfig {
    /// Input channel count per backbone level.
    pub channels_list: Vec<usize>,
    /// Output channel count per level; may be longer than `channels_list`.
    #[serde(default = "default_out_channels")]
    pub out_channels: Vec<usize>,
    /// Number of separable refinement blocks per level.
    #[serde(default = "default_reps")]
    pub reps: usize,
    #[serde(default)]
    pub concat: ConcatMode,
    #[serde(default = "default_bn_eps")]
    pub bn_eps: f64,
}

/// Channel layout of one pyramid level, derived from [`FpnConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpnLevelSpec {
    pub index: usize,
    /// Channels of the backbone feature map entering the level.
    pub in_channels: usize,
    /// Channels of the fused output.
    pub out_channels: usize,
    /// Channels of the previous level's output, `None` for level 0.
    pub lateral_in_channels: Option<usize>,
    /// Channels entering the fusion stack after concatenation.
    pub fusion_in_channels: usize,
}

impl FpnConfig {
    /// Creates a configuration with default output widths, `reps` and batch
    /// norm epsilon.
    ///
    /// # Arguments
    ///
    /// * `channels_list` - Backbone channel count per level, coarsest first
    pub fn new(channels_list: Vec<usize>) -> Self {
        Self {
            channels_list,
            out_channels: default_out_channels(),
            reps: default_reps(),
            concat: ConcatMode::default(),
            bn_eps: default_bn_eps(),
        }
    }

    /// Sets the output width of each level, coarsest first.
    pub fn with_out_channels(mut self, out_channels: Vec<usize>) -> Self {
        self.out_channels = out_channels;
        self
    }

    /// Sets the number of separable refinement blocks per level.
    pub fn with_reps(mut self, reps: usize) -> Self {
        self.reps = reps;
        self
    }

    /// Selects how the upsampled and projected features are joined.
    pub fn with_concat(mut self, concat: ConcatMode) -> Self {
        self.concat = concat;
        self
    }

    /// Sets the epsilon of every batch norm layer.
    pub fn with_bn_eps(mut self, bn_eps: f64) -> Self {
        self.bn_eps = bn_eps;
        self
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DetError> {
        load_json_config(path)
    }

    /// Per-level channel layout. Only meaningful on a validated config.
    pub fn level_specs(&self) -> Vec<FpnLevelSpec> {
        let mut specs = Vec::with_capacity(self.channels_list.len());
        let mut prev_out: Option<usize> = None;
        for (index, (&in_channels, &out_channels)) in self
            .channels_list
            .iter()
            .zip(self.out_channels.iter())
            .enumerate()
        {
            // The lateral projection brings the previous output to `out_channels`
            // before concatenation, so a fused level sees twice its own width.
            let fusion_in_channels = match prev_out {
                Some(_) => 2 * out_channels,
                None => out_channels,
            };
            specs.push(FpnLevelSpec {
                index,
                in_channels,
                out_channels,
                lateral_in_channels: prev_out,
                fusion_in_channels,
            });
            prev_out = Some(out_channels);
        }
        specs
    }
}

impl ConfigValidator for FpnConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.channels_list.is_empty() {
            return Err(ConfigError::InvalidConfig {
                message: "channels_list must contain at least one level".to_string(),
            });
        }
        if self.out_channels.len() < self.channels_list.len() {
            return Err(ConfigError::InvalidConfig {
                message: format!(
                    "out_channels has {} entries but channels_list has {} levels",
                    self.out_channels.len(),
                    self.channels_list.len()
                ),
            });
        }
        for (i, &c) in self.channels_list.iter().enumerate() {
            self.validate_positive(&format!("channels_list[{i}]"), c)?;
        }
        for (i, &c) in self.out_channels.iter().enumerate() {
            self.validate_positive(&format!("out_channels[{i}]"), c)?;
        }
        if !self.bn_eps.is_finite() || self.bn_eps <= 0.0 {
            return Err(ConfigError::InvalidConfig {
                message: format!("bn_eps must be a positive number, got {}", self.bn_eps),
            });
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::new(vec![256, 128, 64])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_level_specs_for_three_levels() {
        let cfg = FpnConfig::new(vec![256, 128, 64]);
        let specs = cfg.level_specs();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].lateral_in_channels, None);
        assert_eq!(specs[0].fusion_in_channels, 512);
        assert_eq!(specs[1].lateral_in_channels, Some(512));
        assert_eq!(specs[1].fusion_in_channels, 512);
        assert_eq!(specs[2].in_channels, 64);
        assert_eq!(specs[2].fusion_in_channels, 256);
    }

    #[test]
    fn test_longer_out_channels_is_allowed() {
        let cfg = FpnConfig::new(vec![64, 32]).with_out_channels(vec![32, 16, 8]);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.level_specs().len(), 2);
    }

    #[test]
    fn test_validation_failures() {
        assert!(FpnConfig::new(vec![]).validate().is_err());
        assert!(
            FpnConfig::new(vec![64, 32, 16, 8])
                .validate()
                .unwrap_err()
                .to_string()
                .contains("out_channels has 3 entries")
        );
        assert!(FpnConfig::new(vec![64, 0, 16]).validate().is_err());
        assert!(FpnConfig::new(vec![64]).with_bn_eps(0.0).validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let cfg = FpnConfig::get_defaults();
        assert_eq!(cfg.channels_list, vec![256, 128, 64]);
        assert_eq!(cfg.out_channels, vec![512, 256, 128]);
        assert_eq!(cfg.reps, 3);
        assert_eq!(cfg.concat, ConcatMode::Plain);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"channels_list": [32, 16], "out_channels": [16, 8], "reps": 1, "concat": "calibrating"}}"#
        )
        .unwrap();
        let cfg = FpnConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.reps, 1);
        assert_eq!(cfg.concat, ConcatMode::Calibrating);
    }

    #[test]
    fn test_from_json_file_rejects_invalid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"channels_list": []}}"#).unwrap();
        assert!(matches!(
            FpnConfig::from_json_file(file.path()),
            Err(DetError::ConfigError { .. })
        ));
    }
}
