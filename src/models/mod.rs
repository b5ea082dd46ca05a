//! Network building blocks and the feature pyramid neck.

pub mod fpn;
pub mod layers;

pub use fpn::{ConcatMode, FeaturePyramid, FpnConfig, FpnLevelSpec};
pub use layers::{ConvNormAct, ConvNormActConfig, SeparableConvNormAct};
