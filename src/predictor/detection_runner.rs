//! Single-image detection: preprocess, forward, suppress, rescale.
//!
//! The runner owns a model and a [`Suppressor`]. Models only need to map a
//! `(1, 3, H, W)` input tensor to a list of output tensors; the first output
//! is taken as the raw `(1, N, 5 + classes)` prediction.

use candle_core::{Device, Module, Tensor};
use image::RgbImage;
use ndarray::ArrayView3;
use tracing::debug;

use crate::core::config::ConfigValidator;
use crate::core::errors::{DetError, ProcessingStage, candle_to_inference, candle_to_processing};
use crate::domain::Detections;
use crate::predictor::config::DetectionConfig;
use crate::processors::{
    BOX_ATTRIBUTES, ChannelOrder, ImagePreprocessor, Suppressor, YoloSuppressor, array_to_image,
    rescale_boxes,
};

/// A detector network as seen by the runner.
pub trait DetectionModel: Send + Sync {
    /// Runs the network on a `(1, 3, H, W)` batch.
    fn forward(&self, input: &Tensor) -> Result<Vec<Tensor>, DetError>;

    /// Name used in error reports and logs.
    fn name(&self) -> &str {
        "detector"
    }
}

/// Adapts any single-output candle [`Module`] into a [`DetectionModel`].
#[derive(Debug, Clone)]
pub struct ModuleModel<M> {
    module: M,
    name: String,
}

impl<M: Module> ModuleModel<M> {
    /// Wraps `module`; `name` shows up in logs and inference errors.
    pub fn new(module: M, name: impl Into<String>) -> Self {
        Self {
            module,
            name: name.into(),
        }
    }
}

impl<M: Module + Send + Sync> DetectionModel for ModuleModel<M> {
    fn forward(&self, input: &Tensor) -> Result<Vec<Tensor>, DetError> {
        let output = self
            .module
            .forward(input)
            .map_err(|e| candle_to_inference(&self.name, "forward pass failed", e))?;
        Ok(vec![output])
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Runs a detector on single images and returns boxes in original image
/// coordinates.
pub struct DetectionRunner<M, S = YoloSuppressor> {
    model: M,
    suppressor: S,
    preprocessor: ImagePreprocessor,
    config: DetectionConfig,
    device: Device,
}

impl<M, S> std::fmt::Debug for DetectionRunner<M, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionRunner")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl<M: DetectionModel> DetectionRunner<M, YoloSuppressor> {
    /// Runner with the default YOLO suppressor.
    pub fn with_default_suppressor(
        model: M,
        config: DetectionConfig,
        device: Device,
    ) -> Result<Self, DetError> {
        Self::new(model, YoloSuppressor::default(), config, device)
    }
}

impl<M: DetectionModel, S: Suppressor> DetectionRunner<M, S> {
    /// Creates a runner.
    ///
    /// # Arguments
    ///
    /// * `model` - Network mapping a `(1, 3, H, W)` input to raw predictions
    /// * `suppressor` - Turns raw predictions into per-image detections
    /// * `config` - Inference size, thresholds and input channel order
    /// * `device` - Device the input tensor is created on
    ///
    /// # Errors
    ///
    /// [`DetError::ConfigError`] when the configuration does not validate.
    pub fn new(
        model: M,
        suppressor: S,
        config: DetectionConfig,
        device: Device,
    ) -> Result<Self, DetError> {
        config.validate()?;
        Ok(Self {
            model,
            suppressor,
            preprocessor: ImagePreprocessor::new(config.input_size),
            config,
            device,
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// The wrapped detector network.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Detects objects in an `(H, W, 3)` pixel array whose channels follow
    /// the configured [`ChannelOrder`].
    ///
    /// # Arguments
    ///
    /// * `pixels` - Interleaved 8-bit pixels, rows first
    ///
    /// # Returns
    ///
    /// Boxes in the array's pixel coordinates, highest confidence first. Empty
    /// when nothing survives.
    ///
    /// # Errors
    ///
    /// * [`DetError::InvalidInput`] for an empty image or a malformed prediction
    /// * [`DetError::Inference`] when the model fails or returns no outputs
    pub fn detect(&self, pixels: ArrayView3<u8>) -> Result<Detections, DetError> {
        let image = array_to_image(pixels)?;
        self.run(&image, self.config.channel_order)
    }

    /// Detects objects in an RGB image.
    pub fn detect_rgb(&self, image: &RgbImage) -> Result<Detections, DetError> {
        self.run(image, ChannelOrder::Rgb)
    }

    fn run(&self, image: &RgbImage, order: ChannelOrder) -> Result<Detections, DetError> {
        let original_size = image.dimensions();
        if original_size.0 == 0 || original_size.1 == 0 {
            return Err(DetError::invalid_input(format!(
                "image must not be empty, got {}x{}",
                original_size.0, original_size.1
            )));
        }

        let input = self.preprocessor.preprocess(image, order, &self.device)?;
        let outputs = self.model.forward(&input)?;
        let prediction = outputs.into_iter().next().ok_or_else(|| {
            DetError::inference_error(
                self.model.name(),
                "model produced no outputs",
                candle_core::Error::Msg("empty output list".to_string()),
            )
        })?;
        let prediction = normalize_prediction(prediction.detach())?;

        let per_image = self.suppressor.suppress(
            &prediction,
            self.config.conf_threshold,
            self.config.nms_threshold,
        )?;
        let detections = match per_image.into_iter().next().flatten() {
            Some(dets) if !dets.is_empty() => dets,
            _ => {
                debug!(model = self.model.name(), "no detections");
                return Ok(Detections::default());
            }
        };

        let detections = rescale_boxes(self.config.input_size, detections, original_size);
        debug!(
            model = self.model.name(),
            width = original_size.0,
            height = original_size.1,
            count = detections.len(),
            "detection finished"
        );
        Ok(detections)
    }
}

/// Brings a raw prediction to `(batch, candidates, attributes)`.
fn normalize_prediction(prediction: Tensor) -> Result<Tensor, DetError> {
    let prediction = match prediction.rank() {
        3 => prediction,
        2 => prediction.unsqueeze(0).map_err(|e| {
            candle_to_processing(
                ProcessingStage::PostProcessing,
                "failed to add batch dimension",
                e,
            )
        })?,
        rank => {
            return Err(DetError::invalid_input(format!(
                "prediction must have rank 2 or 3, got rank {rank} with shape {:?}",
                prediction.dims()
            )));
        }
    };

    let attributes = prediction.dims().last().copied().unwrap_or(0);
    if attributes < BOX_ATTRIBUTES + 1 {
        return Err(DetError::validation_error(
            "DetectionRunner",
            "prediction attributes",
            &format!(">= {}", BOX_ATTRIBUTES + 1),
            &attributes.to_string(),
        ));
    }
    Ok(prediction)
}
