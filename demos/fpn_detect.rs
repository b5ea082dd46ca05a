//! FPN Detection Example
//!
//! Builds a small detector (strided conv backbone, feature pyramid neck and a
//! YOLO-style head on the finest pyramid level), runs it on one image through
//! the [`DetectionRunner`] and prints the detections as JSON.
//!
//! Without `--weights` the network is randomly initialized, which is enough to
//! exercise the whole pipeline end to end.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example fpn_detect -- [OPTIONS] <IMAGE>
//! ```
//!
//! # Arguments
//!
//! * `--weights` - Optional safetensors file with the detector's parameters
//! * `--device` - Device to use for inference (e.g., 'cpu', 'cuda', 'cuda:0')
//! * `--width`, `--height` - Inference canvas size (default: 320x320); both must
//!   be multiples of 16 so every backbone stage halves the resolution exactly
//! * `--conf-threshold` - Confidence threshold (default: 0.3)
//! * `--nms-threshold` - IoU threshold for suppression (default: 0.5)
//! * `--num-classes` - Number of classes predicted by the head (default: 80)
//! * `--config` - Optional JSON file with a `DetectionConfig`
//! * `-o, --output` - Write the JSON result to a file instead of stdout
//! * `<IMAGE>` - Path to the input image
//!
//! # Example
//!
//! ```bash
//! RUST_LOG=debug cargo run --example fpn_detect -- --conf-threshold 0.6 street.jpg
//! ```

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, VarBuilder, VarMap};
use clap::Parser;
use fpn_det::core::errors::{DetError, candle_to_inference};
use fpn_det::models::layers::{ConvNormAct, ConvNormActConfig};
use fpn_det::models::{FeaturePyramid, FpnConfig};
use fpn_det::predictor::{DetectionConfig, DetectionModel, DetectionRunner};
use fpn_det::processors::{BOX_ATTRIBUTES, YoloSuppressor};
use fpn_det::utils::{element_count, init_tracing, load_image, parse_device};
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

const MODEL_NAME: &str = "toy-fpn-detector";

/// Command-line arguments for the FPN detection example
#[derive(Parser)]
#[command(name = "fpn_detect")]
#[command(about = "FPN Detection Example - runs a small feature pyramid detector on an image")]
struct Args {
    /// Path to the input image
    image: PathBuf,

    /// Safetensors file with the detector's parameters (random init if absent)
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Device to use for inference (e.g., 'cpu', 'cuda', 'cuda:0')
    #[arg(long, default_value = "cpu")]
    device: String,

    /// JSON file with the detection configuration; overrides the flags below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Inference canvas width (multiple of 16)
    #[arg(long, default_value_t = 320)]
    width: u32,

    /// Inference canvas height (multiple of 16)
    #[arg(long, default_value_t = 320)]
    height: u32,

    /// Confidence threshold
    #[arg(long, default_value_t = 0.3)]
    conf_threshold: f32,

    /// IoU threshold for non-maximum suppression
    #[arg(long, default_value_t = 0.5)]
    nms_threshold: f32,

    /// Number of classes predicted by the head
    #[arg(long, default_value_t = 80)]
    num_classes: usize,

    /// Maximum detections kept per image
    #[arg(long, default_value_t = 300)]
    max_detections: usize,

    /// Write the JSON result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Backbone stages at strides 2, 4, 8 and 16 feeding a three-level pyramid.
struct ToyDetector {
    stages: Vec<ConvNormAct>,
    fpn: FeaturePyramid,
    head: Conv2d,
}

impl ToyDetector {
    const STAGE_CHANNELS: [usize; 5] = [3, 16, 32, 64, 128];

    /// Stride of the finest pyramid level, where the head runs.
    const HEAD_STRIDE: f32 = 4.0;

    /// Stride of the coarsest backbone stage.
    const MAX_STRIDE: u32 = 16;

    /// The pyramid needs every level to be exactly twice the next coarser
    /// one, which only holds when the canvas divides by the deepest stride.
    fn check_canvas(width: u32, height: u32) -> Result<(), DetError> {
        if width == 0
            || height == 0
            || width % Self::MAX_STRIDE != 0
            || height % Self::MAX_STRIDE != 0
        {
            return Err(DetError::invalid_input(format!(
                "canvas {width}x{height} must be a non-zero multiple of {} in both dimensions",
                Self::MAX_STRIDE
            )));
        }
        Ok(())
    }

    fn new(num_classes: usize, vb: VarBuilder) -> Result<Self, DetError> {
        let stage_cfg = ConvNormActConfig::default().with_stride(2);
        let stages = Self::STAGE_CHANNELS
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                ConvNormAct::new(pair[0], pair[1], 3, stage_cfg, vb.pp(format!("backbone.{i}")))
            })
            .collect::<candle_core::Result<Vec<_>>>()
            .map_err(|e| candle_to_inference(MODEL_NAME, "load backbone", e))?;

        let fpn_cfg = FpnConfig::new(vec![128, 64, 32])
            .with_out_channels(vec![128, 64, 32])
            .with_reps(1);
        let fpn = FeaturePyramid::new(&fpn_cfg, vb.pp("neck"))?;

        let head = candle_nn::conv2d(
            32,
            BOX_ATTRIBUTES + num_classes,
            1,
            Default::default(),
            vb.pp("head"),
        )
        .map_err(|e| candle_to_inference(MODEL_NAME, "load head", e))?;

        Ok(Self { stages, fpn, head })
    }

    fn backbone(&self, input: &Tensor) -> candle_core::Result<Vec<Tensor>> {
        let mut xs = input.clone();
        let mut features = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            xs = stage.forward(&xs)?;
            features.push(xs.clone());
        }
        // strides 4, 8, 16, coarsest first
        Ok(features.into_iter().skip(1).rev().collect())
    }

    /// Turns the head's `(1, 5 + C, H, W)` map into `(1, H * W, 5 + C)` rows
    /// of `(cx, cy, w, h, objectness, class scores)` in canvas pixels.
    fn decode(&self, raw: &Tensor, canvas: (usize, usize)) -> candle_core::Result<Tensor> {
        let (_, attrs, h, w) = raw.dims4()?;
        let device = raw.device();
        let preds = candle_nn::ops::sigmoid(raw)?
            .flatten_from(2)?
            .transpose(1, 2)?
            .contiguous()?;

        let grid: Vec<f32> = (0..h)
            .flat_map(|y| (0..w).flat_map(move |x| [x as f32 + 0.5, y as f32 + 0.5]))
            .collect();
        let grid = Tensor::from_vec(grid, (1, h * w, 2), device)?;
        let xy = preds
            .narrow(2, 0, 2)?
            .affine(2.0, -1.0)?
            .add(&grid)?
            .affine(Self::HEAD_STRIDE as f64, 0.0)?;

        let canvas = Tensor::new(&[canvas.0 as f32, canvas.1 as f32], device)?.reshape((1, 1, 2))?;
        let wh = preds.narrow(2, 2, 2)?.broadcast_mul(&canvas)?;
        let rest = preds.narrow(2, 4, attrs - 4)?;
        Tensor::cat(&[&xy, &wh, &rest], 2)
    }
}

impl DetectionModel for ToyDetector {
    fn forward(&self, input: &Tensor) -> Result<Vec<Tensor>, DetError> {
        let (_, _, h, w) = input
            .dims4()
            .map_err(|e| candle_to_inference(MODEL_NAME, "input must be NCHW", e))?;
        let features = self
            .backbone(input)
            .map_err(|e| candle_to_inference(MODEL_NAME, "backbone", e))?;
        let pyramid = self.fpn.forward(&features)?;
        let finest = pyramid
            .last()
            .ok_or_else(|| DetError::invalid_input("pyramid produced no levels"))?;
        let prediction = self
            .head
            .forward(finest)
            .and_then(|raw| self.decode(&raw, (w, h)))
            .map_err(|e| candle_to_inference(MODEL_NAME, "head", e))?;
        Ok(vec![prediction])
    }

    fn name(&self) -> &str {
        MODEL_NAME
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let device: Device = parse_device(&args.device)?;
    info!("Using device: {:?}", device);

    let config = match &args.config {
        Some(path) => DetectionConfig::from_json_file(path)?,
        None => DetectionConfig::default()
            .with_input_size(args.width, args.height)
            .with_conf_threshold(args.conf_threshold)
            .with_nms_threshold(args.nms_threshold),
    };
    ToyDetector::check_canvas(config.input_size.0, config.input_size.1)?;

    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = ToyDetector::new(args.num_classes, vb)?;
    match &args.weights {
        Some(path) => {
            varmap.load(path)?;
            info!("Loaded weights from {:?}", path);
        }
        None => {
            let vars = varmap.all_vars();
            let params = element_count(vars.iter().map(|v| v.as_tensor()));
            info!("Using randomly initialized weights ({params} parameters)");
        }
    }

    let runner = DetectionRunner::new(
        model,
        YoloSuppressor::new(args.max_detections),
        config,
        device,
    )?;

    let image = load_image(&args.image)?;
    info!(
        "Loaded {:?} ({}x{})",
        args.image,
        image.width(),
        image.height()
    );

    let start = Instant::now();
    let detections = runner.detect_rgb(&image)?;
    info!(
        "Found {} detections in {:.2?}",
        detections.len(),
        start.elapsed()
    );

    let result = json!({
        "image": args.image,
        "width": image.width(),
        "height": image.height(),
        "config": runner.config(),
        "detections": detections,
    });
    let text = serde_json::to_string_pretty(&result)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, text)?;
            info!("Wrote results to {:?}", path);
        }
        None => println!("{text}"),
    }

    Ok(())
}
