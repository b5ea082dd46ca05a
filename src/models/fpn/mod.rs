//! Feature pyramid network neck.
//!
//! The pyramid fuses backbone feature maps top-down. Levels are ordered from
//! the coarsest (smallest spatial size, most channels of semantic context) to
//! the finest. Each level projects its backbone input to its output width; from
//! level 1 on it also receives the previous level's fused output, projected
//! laterally, upsampled 2× and concatenated in front of the projection. A 1×1
//! reduction and `reps` depthwise-separable blocks then refine the result.
//!
//! Consecutive backbone levels must differ by exactly 2× in height and width.
//! [`FeaturePyramid::forward`] checks this before every concatenation.
//!
//! ```
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::VarBuilder;
//! use fpn_det::models::fpn::{FeaturePyramid, FpnConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = Device::Cpu;
//! let vb = VarBuilder::zeros(DType::F32, &device);
//! let config = FpnConfig::new(vec![32, 16]).with_out_channels(vec![16, 8]).with_reps(1);
//! let fpn = FeaturePyramid::new(&config, vb)?;
//!
//! let features = vec![
//!     Tensor::zeros((1, 32, 4, 4), DType::F32, &device)?,
//!     Tensor::zeros((1, 16, 8, 8), DType::F32, &device)?,
//! ];
//! let fused = fpn.forward(&features)?;
//! assert_eq!(fused[0].dims4()?, (1, 16, 4, 4));
//! assert_eq!(fused[1].dims4()?, (1, 8, 8, 8));
//! # Ok(())
//! # }
//! ```

mod concat;
mod config;

pub use concat::{CalibratingConcat, ConcatStrategy, PlainConcat, ValueRange};
pub use config::{ConcatMode, FpnConfig, FpnLevelSpec};

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::core::config::ConfigValidator;
use crate::core::errors::{DetError, ProcessingStage, candle_to_inference, candle_to_processing};
use crate::models::layers::{ConvNormAct, SeparableConvNormAct};
use crate::utils::upsample_bilinear_2x;

const MODEL_NAME: &str = "FPN";

/// 1×1 channel reduction followed by the separable refinement blocks.
#[derive(Debug, Clone)]
struct FusionStack {
    reduce: ConvNormAct,
    refine: Vec<SeparableConvNormAct>,
}

impl FusionStack {
    fn new(spec: &FpnLevelSpec, reps: usize, bn_eps: f64, vb: VarBuilder) -> candle_core::Result<Self> {
        let reduce =
            ConvNormAct::pointwise(spec.fusion_in_channels, spec.out_channels, bn_eps, vb.pp(0))?;
        let refine = (0..reps)
            .map(|rep| {
                SeparableConvNormAct::new(
                    spec.out_channels,
                    spec.out_channels,
                    bn_eps,
                    vb.pp(rep + 1),
                )
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { reduce, refine })
    }
}

impl Module for FusionStack {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = self.reduce.forward(xs)?;
        for block in &self.refine {
            xs = block.forward(&xs)?;
        }
        Ok(xs)
    }
}

/// Everything one pyramid level owns.
#[derive(Debug, Clone)]
struct FpnLevel {
    spec: FpnLevelSpec,
    in_proj: ConvNormAct,
    /// Projects the previous level's output; absent on level 0.
    lateral: Option<ConvNormAct>,
    fusion: FusionStack,
}

impl FpnLevel {
    fn new(spec: FpnLevelSpec, reps: usize, bn_eps: f64, vb: VarBuilder) -> Result<Self, DetError> {
        let i = spec.index;
        let in_proj =
            ConvNormAct::pointwise(spec.in_channels, spec.out_channels, bn_eps, vb.pp("in_proj"))
                .map_err(|e| candle_to_inference(MODEL_NAME, format!("load level {i} in_proj"), e))?;
        let lateral = spec
            .lateral_in_channels
            .map(|prev| ConvNormAct::pointwise(prev, spec.out_channels, bn_eps, vb.pp("lateral")))
            .transpose()
            .map_err(|e| candle_to_inference(MODEL_NAME, format!("load level {i} lateral"), e))?;
        let fusion = FusionStack::new(&spec, reps, bn_eps, vb.pp("fusion"))
            .map_err(|e| candle_to_inference(MODEL_NAME, format!("load level {i} fusion"), e))?;
        Ok(Self {
            spec,
            in_proj,
            lateral,
            fusion,
        })
    }
}

/// Top-down feature pyramid over a list of backbone feature maps.
///
/// Parameters are read from the [`VarBuilder`] under
/// `levels.{i}.in_proj`, `levels.{i}.lateral` (i > 0) and
/// `levels.{i}.fusion.{j}`, where `fusion.0` is the 1×1 reduction and
/// `fusion.1..=reps` the separable blocks.
#[derive(Debug)]
pub struct FeaturePyramid {
    levels: Vec<FpnLevel>,
    concat: Box<dyn ConcatStrategy>,
    config: FpnConfig,
    span: tracing::Span,
}

impl FeaturePyramid {
    /// Validates `config` and allocates every level's parameters from `vb`.
    ///
    /// # Arguments
    ///
    /// * `config` - Channel layout, refinement depth and concat mode
    /// * `vb` - Source of the parameters; names are listed on [`FeaturePyramid`]
    ///
    /// # Returns
    ///
    /// A pyramid ready for [`FeaturePyramid::forward`].
    ///
    /// # Errors
    ///
    /// [`DetError::ConfigError`] for an invalid configuration and
    /// [`DetError::Inference`] when a parameter is missing or mis-shaped.
    pub fn new(config: &FpnConfig, vb: VarBuilder) -> Result<Self, DetError> {
        config.validate()?;
        let specs = config.level_specs();
        let vb = vb.pp("levels");
        let levels = specs
            .into_iter()
            .map(|spec| FpnLevel::new(spec, config.reps, config.bn_eps, vb.pp(spec.index)))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            levels = levels.len(),
            channels_list = ?config.channels_list,
            out_channels = ?&config.out_channels[..levels.len()],
            reps = config.reps,
            concat = ?config.concat,
            "built feature pyramid"
        );

        Ok(Self {
            concat: concat::strategy_for(config.concat, levels.len()),
            levels,
            config: config.clone(),
            span: tracing::span!(tracing::Level::TRACE, "fpn"),
        })
    }

    pub fn config(&self) -> &FpnConfig {
        &self.config
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Output channel count of every level, in level order.
    pub fn out_channels(&self) -> Vec<usize> {
        self.levels.iter().map(|level| level.spec.out_channels).collect()
    }

    /// Value ranges recorded by the calibrating concatenation, per level.
    /// Empty for [`ConcatMode::Plain`].
    pub fn calibration_ranges(&self) -> Vec<Option<ValueRange>> {
        self.concat.ranges()
    }

    /// Fuses `features` (coarsest first) into one output per level.
    ///
    /// Output `i` has `out_channels[i]` channels and the spatial size of
    /// `features[i]`.
    ///
    /// # Errors
    ///
    /// [`DetError::InvalidInput`] when the number of feature maps differs from
    /// the number of levels, a feature map has the wrong channel count, or two
    /// consecutive levels are not exactly 2× apart in resolution.
    pub fn forward(&self, features: &[Tensor]) -> Result<Vec<Tensor>, DetError> {
        let _enter = self.span.enter();
        if features.len() != self.levels.len() {
            return Err(DetError::validation_error(
                MODEL_NAME,
                "features",
                &format!("{} feature maps", self.levels.len()),
                &features.len().to_string(),
            ));
        }

        let mut outputs: Vec<Tensor> = Vec::with_capacity(self.levels.len());
        for (level, input) in self.levels.iter().zip(features) {
            let i = level.spec.index;
            let (_, channels, _, _) = input.dims4().map_err(|e| {
                candle_to_processing(
                    ProcessingStage::TensorOperation,
                    format!("level {i} input must be NCHW"),
                    e,
                )
            })?;
            if channels != level.spec.in_channels {
                return Err(DetError::validation_error(
                    MODEL_NAME,
                    &format!("features[{i}] channels"),
                    &level.spec.in_channels.to_string(),
                    &channels.to_string(),
                ));
            }

            let feature = level
                .in_proj
                .forward(input)
                .map_err(|e| candle_to_inference(MODEL_NAME, format!("level {i} in_proj"), e))?;

            let fused_input = match &level.lateral {
                Some(lateral) => {
                    let prev = outputs.last().ok_or_else(|| {
                        DetError::invalid_input(format!("level {i} has no coarser level to fuse"))
                    })?;
                    let upsampled = lateral
                        .forward(prev)
                        .and_then(|t| upsample_bilinear_2x(&t))
                        .map_err(|e| {
                            candle_to_inference(MODEL_NAME, format!("level {i} lateral"), e)
                        })?;
                    check_pyramid_step(i, &upsampled, &feature)?;
                    self.concat
                        .concat(i, &[&upsampled, &feature])
                        .map_err(|e| candle_to_inference(MODEL_NAME, format!("level {i} concat"), e))?
                }
                None => feature,
            };

            let fused = level
                .fusion
                .forward(&fused_input)
                .map_err(|e| candle_to_inference(MODEL_NAME, format!("level {i} fusion"), e))?;
            outputs.push(fused);
        }
        Ok(outputs)
    }
}

/// The upsampled coarse feature must line up with the current level.
fn check_pyramid_step(level: usize, upsampled: &Tensor, feature: &Tensor) -> Result<(), DetError> {
    let up = upsampled.dims();
    let cur = feature.dims();
    if up[0] != cur[0] || up[2..] != cur[2..] {
        return Err(DetError::invalid_input(format!(
            "level {level} is not a 2x step of level {}: upsampled coarse feature {:?} \
             does not match {:?}",
            level - 1,
            up,
            cur
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn zeros(shape: (usize, usize, usize, usize)) -> Tensor {
        Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap()
    }

    fn small_config() -> FpnConfig {
        FpnConfig::new(vec![16, 8, 4])
            .with_out_channels(vec![8, 4, 2])
            .with_reps(1)
    }

    #[test]
    fn test_parameter_names_follow_level_layout() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        FeaturePyramid::new(&small_config(), vb).unwrap();

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["levels.0.in_proj.conv.weight"].dims(), &[8, 16, 1, 1]);
        assert!(!data.contains_key("levels.0.lateral.conv.weight"));
        assert_eq!(data["levels.1.lateral.conv.weight"].dims(), &[4, 8, 1, 1]);
        assert_eq!(data["levels.1.fusion.0.conv.weight"].dims(), &[4, 8, 1, 1]);
        assert_eq!(
            data["levels.2.fusion.1.depthwise.conv.weight"].dims(),
            &[2, 1, 3, 3]
        );
    }

    #[test]
    fn test_forward_rejects_wrong_feature_count() {
        let fpn = FeaturePyramid::new(&small_config(), VarBuilder::zeros(DType::F32, &Device::Cpu))
            .unwrap();
        let err = fpn.forward(&[zeros((1, 16, 2, 2))]).unwrap_err();
        assert!(matches!(err, DetError::InvalidInput { .. }));
    }

    #[test]
    fn test_forward_rejects_wrong_channels() {
        let fpn = FeaturePyramid::new(&small_config(), VarBuilder::zeros(DType::F32, &Device::Cpu))
            .unwrap();
        let features = [zeros((1, 16, 2, 2)), zeros((1, 9, 4, 4)), zeros((1, 4, 8, 8))];
        let err = fpn.forward(&features).unwrap_err();
        assert!(err.to_string().contains("features[1] channels"));
    }

    #[test]
    fn test_forward_rejects_non_doubling_pyramid() {
        let fpn = FeaturePyramid::new(&small_config(), VarBuilder::zeros(DType::F32, &Device::Cpu))
            .unwrap();
        let features = [zeros((1, 16, 2, 2)), zeros((1, 8, 4, 4)), zeros((1, 4, 6, 6))];
        let err = fpn.forward(&features).unwrap_err();
        assert!(err.to_string().contains("level 2 is not a 2x step"), "{err}");
    }

    #[test]
    fn test_calibrating_concat_records_fused_levels_only() {
        let cfg = small_config().with_concat(ConcatMode::Calibrating);
        let fpn = FeaturePyramid::new(&cfg, VarBuilder::zeros(DType::F32, &Device::Cpu)).unwrap();
        let features = [zeros((1, 16, 2, 2)), zeros((1, 8, 4, 4)), zeros((1, 4, 8, 8))];
        fpn.forward(&features).unwrap();

        let ranges = fpn.calibration_ranges();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], None);
        assert_eq!(ranges[1], Some(ValueRange { min: 0.0, max: 0.0 }));
        assert!(ranges[2].is_some());
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let cfg = FpnConfig::new(vec![16, 8, 4, 2]);
        let err = FeaturePyramid::new(&cfg, VarBuilder::zeros(DType::F32, &Device::Cpu))
            .unwrap_err();
        assert!(matches!(err, DetError::ConfigError { .. }));
    }
}
