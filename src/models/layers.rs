//! Convolution blocks shared by the feature pyramid and small detectors.
//!
//! Both blocks follow the usual `conv → batch norm → activation` layout. The
//! convolutions carry no bias since the following batch norm provides one.
//! Batch norm always runs in inference mode on its running statistics.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{Activation, BatchNorm, Conv2d, Conv2dConfig, VarBuilder};

/// Default batch-norm epsilon, matching PyTorch's `BatchNorm2d`.
pub const DEFAULT_BN_EPS: f64 = 1e-5;

/// Options for a [`ConvNormAct`] block.
#[derive(Debug, Clone, Copy)]
pub struct ConvNormActConfig {
    pub stride: usize,
    pub groups: usize,
    pub bn_eps: f64,
    /// `None` leaves the normalized output linear.
    pub activation: Option<Activation>,
}

impl Default for ConvNormActConfig {
    fn default() -> Self {
        Self {
            stride: 1,
            groups: 1,
            bn_eps: DEFAULT_BN_EPS,
            activation: Some(Activation::Relu),
        }
    }
}

impl ConvNormActConfig {
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_bn_eps(mut self, bn_eps: f64) -> Self {
        self.bn_eps = bn_eps;
        self
    }

    pub fn with_activation(mut self, activation: Option<Activation>) -> Self {
        self.activation = activation;
        self
    }
}

/// `k×k` convolution with `k / 2` padding, batch norm and an optional activation.
///
/// Parameters live under `conv.weight` and `bn.{weight,bias,running_mean,running_var}`.
#[derive(Debug, Clone)]
pub struct ConvNormAct {
    conv: Conv2d,
    bn: BatchNorm,
    activation: Option<Activation>,
    out_channels: usize,
    span: tracing::Span,
}

impl ConvNormAct {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        cfg: ConvNormActConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv_cfg = Conv2dConfig {
            padding: kernel_size / 2,
            stride: cfg.stride,
            dilation: 1,
            groups: cfg.groups,
            cudnn_fwd_algo: None,
        };
        let conv = candle_nn::conv2d_no_bias(
            in_channels,
            out_channels,
            kernel_size,
            conv_cfg,
            vb.pp("conv"),
        )?;
        let bn = candle_nn::batch_norm(out_channels, cfg.bn_eps, vb.pp("bn"))?;
        Ok(Self {
            conv,
            bn,
            activation: cfg.activation,
            out_channels,
            span: tracing::span!(tracing::Level::TRACE, "conv-norm-act"),
        })
    }

    /// 1×1 projection with the default ReLU activation.
    pub fn pointwise(
        in_channels: usize,
        out_channels: usize,
        bn_eps: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = ConvNormActConfig::default().with_bn_eps(bn_eps);
        Self::new(in_channels, out_channels, 1, cfg, vb)
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl Module for ConvNormAct {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let xs = self.conv.forward(xs)?;
        let xs = self.bn.forward_t(&xs, false)?;
        match &self.activation {
            Some(act) => act.forward(&xs),
            None => Ok(xs),
        }
    }
}

/// Depthwise-separable block: depthwise 3×3 conv + norm + mid activation,
/// then pointwise 1×1 conv + norm + activation.
///
/// Keeps the spatial size. Parameters live under `depthwise.*` and `pointwise.*`.
#[derive(Debug, Clone)]
pub struct SeparableConvNormAct {
    depthwise: ConvNormAct,
    pointwise: ConvNormAct,
    span: tracing::Span,
}

impl SeparableConvNormAct {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        bn_eps: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let depthwise_cfg = ConvNormActConfig::default()
            .with_groups(in_channels)
            .with_bn_eps(bn_eps);
        let depthwise =
            ConvNormAct::new(in_channels, in_channels, 3, depthwise_cfg, vb.pp("depthwise"))?;
        let pointwise =
            ConvNormAct::pointwise(in_channels, out_channels, bn_eps, vb.pp("pointwise"))?;
        Ok(Self {
            depthwise,
            pointwise,
            span: tracing::span!(tracing::Level::TRACE, "separable-conv-norm-act"),
        })
    }
}

impl Module for SeparableConvNormAct {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let xs = self.depthwise.forward(xs)?;
        self.pointwise.forward(&xs)
    }
}
