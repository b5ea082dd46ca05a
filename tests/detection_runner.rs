use std::sync::Mutex;

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use fpn_det::core::DetError;
use fpn_det::models::{FeaturePyramid, FpnConfig};
use fpn_det::predictor::{DetectionConfig, DetectionModel, DetectionRunner, ModuleModel};
use fpn_det::processors::{ChannelOrder, YoloSuppressor};
use image::RgbImage;
use ndarray::Array3;

/// Returns a fixed prediction and keeps the last input it saw.
struct RecordingModel {
    outputs: Vec<Tensor>,
    last_input: Mutex<Option<Tensor>>,
}

impl RecordingModel {
    fn returning(outputs: Vec<Tensor>) -> Self {
        Self {
            outputs,
            last_input: Mutex::new(None),
        }
    }

    fn rows(rows: &[[f32; 7]]) -> Self {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let pred = Tensor::from_vec(flat, (1, rows.len(), 7), &Device::Cpu).unwrap();
        Self::returning(vec![pred])
    }

    fn last_input(&self) -> Tensor {
        self.last_input.lock().unwrap().clone().unwrap()
    }
}

impl DetectionModel for RecordingModel {
    fn forward(&self, input: &Tensor) -> Result<Vec<Tensor>, DetError> {
        *self.last_input.lock().unwrap() = Some(input.clone());
        Ok(self.outputs.clone())
    }
}

fn runner<M: DetectionModel>(model: M, config: DetectionConfig) -> DetectionRunner<M> {
    DetectionRunner::with_default_suppressor(model, config, Device::Cpu).unwrap()
}

fn bgr_pixels(height: usize, width: usize, pixel: [u8; 3]) -> Array3<u8> {
    Array3::from_shape_fn((height, width, 3), |(_, _, c)| pixel[c])
}

#[test]
fn full_canvas_box_maps_to_full_image() {
    let model = RecordingModel::rows(&[[160.0, 160.0, 320.0, 320.0, 0.9, 1.0, 0.0]]);
    let runner = runner(model, DetectionConfig::default());
    let dets = runner.detect(bgr_pixels(50, 100, [0, 0, 0]).view()).unwrap();

    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].to_row(), [0.0, 0.0, 100.0, 50.0, 0.9, 0.0]);
    assert_eq!(dets.to_array().shape(), &[1, 6]);
}

#[test]
fn boxes_are_clipped_and_rounded() {
    // (-10, 100) to (170, 300) on the 320 canvas, image is 640x480
    let model = RecordingModel::rows(&[[80.0, 200.0, 180.0, 200.0, 0.8, 1.0, 0.0]]);
    let runner = runner(model, DetectionConfig::default());
    let dets = runner.detect_rgb(&RgbImage::new(640, 480)).unwrap();
    assert_eq!(dets[0].to_row()[..4], [0.0, 150.0, 340.0, 450.0]);
}

#[test]
fn nothing_above_threshold_gives_empty_result() {
    let model = RecordingModel::rows(&[[50.0, 50.0, 10.0, 10.0, 0.5, 0.5, 0.1]]);
    let runner = runner(model, DetectionConfig::default());
    let dets = runner.detect_rgb(&RgbImage::new(32, 32)).unwrap();
    assert!(dets.is_empty());
    assert_eq!(dets.to_array().shape(), &[0, 6]);
}

#[test]
fn zero_candidate_rows_give_empty_result() {
    let pred = Tensor::zeros((1, 0, 7), DType::F32, &Device::Cpu).unwrap();
    let runner = runner(RecordingModel::returning(vec![pred]), DetectionConfig::default());
    assert!(runner.detect_rgb(&RgbImage::new(32, 32)).unwrap().is_empty());
}

#[test]
fn rank_two_prediction_is_treated_as_one_image() {
    let pred = Tensor::from_vec(
        vec![100f32, 100.0, 20.0, 20.0, 0.9, 0.0, 1.0],
        (1, 7),
        &Device::Cpu,
    )
    .unwrap();
    let runner = runner(RecordingModel::returning(vec![pred]), DetectionConfig::default());
    let dets = runner.detect_rgb(&RgbImage::new(320, 320)).unwrap();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_id, 1);
    assert_eq!(dets[0].to_row()[..4], [90.0, 90.0, 110.0, 110.0]);
}

#[test]
fn only_first_output_is_used() {
    let first = Tensor::from_vec(
        vec![100f32, 100.0, 20.0, 20.0, 0.9, 1.0, 0.0],
        (1, 1, 7),
        &Device::Cpu,
    )
    .unwrap();
    let second = Tensor::zeros((3, 3), DType::F32, &Device::Cpu).unwrap();
    let runner = runner(
        RecordingModel::returning(vec![first, second]),
        DetectionConfig::default(),
    );
    assert_eq!(runner.detect_rgb(&RgbImage::new(320, 320)).unwrap().len(), 1);
}

#[test]
fn bgr_input_reaches_model_as_rgb() {
    let cfg = DetectionConfig::default().with_input_size(8, 4);
    let runner = runner(RecordingModel::rows(&[]), cfg);
    runner.detect(bgr_pixels(6, 6, [10, 20, 255]).view()).unwrap();

    let input = runner.model().last_input();
    assert_eq!(input.dims4().unwrap(), (1, 3, 4, 8));
    let r: f32 = input.i((0, 0, 1, 1)).unwrap().to_scalar().unwrap();
    let b: f32 = input.i((0, 2, 1, 1)).unwrap().to_scalar().unwrap();
    assert!((r - 1.0).abs() < 1e-6);
    assert!((b - 10.0 / 255.0).abs() < 1e-6);
}

#[test]
fn rgb_channel_order_is_kept() {
    let cfg = DetectionConfig::default()
        .with_input_size(4, 4)
        .with_channel_order(ChannelOrder::Rgb);
    let runner = runner(RecordingModel::rows(&[]), cfg);
    runner.detect(bgr_pixels(4, 4, [10, 20, 255]).view()).unwrap();

    let r: f32 = runner
        .model()
        .last_input()
        .i((0, 0, 0, 0))
        .unwrap()
        .to_scalar()
        .unwrap();
    assert!((r - 10.0 / 255.0).abs() < 1e-6);
}

#[test]
fn empty_image_is_invalid_input() {
    let runner = runner(RecordingModel::rows(&[]), DetectionConfig::default());
    let empty = Array3::<u8>::zeros((0, 10, 3));
    assert!(matches!(
        runner.detect(empty.view()),
        Err(DetError::InvalidInput { .. })
    ));
    assert!(matches!(
        runner.detect_rgb(&RgbImage::new(0, 0)),
        Err(DetError::InvalidInput { .. })
    ));
}

#[test]
fn too_few_prediction_columns_is_invalid_input() {
    let pred = Tensor::zeros((1, 10, 5), DType::F32, &Device::Cpu).unwrap();
    let runner = runner(RecordingModel::returning(vec![pred]), DetectionConfig::default());
    assert!(matches!(
        runner.detect_rgb(&RgbImage::new(16, 16)),
        Err(DetError::InvalidInput { .. })
    ));
}

#[test]
fn model_without_outputs_is_inference_error() {
    let runner = runner(RecordingModel::returning(vec![]), DetectionConfig::default());
    assert!(matches!(
        runner.detect_rgb(&RgbImage::new(16, 16)),
        Err(DetError::Inference { .. })
    ));
}

#[test]
fn custom_suppressor_limit_is_honoured() {
    let model = RecordingModel::rows(&[
        [20.0, 20.0, 10.0, 10.0, 0.9, 1.0, 0.0],
        [120.0, 120.0, 10.0, 10.0, 0.8, 1.0, 0.0],
        [220.0, 220.0, 10.0, 10.0, 0.7, 0.0, 1.0],
    ]);
    let runner = DetectionRunner::new(
        model,
        YoloSuppressor::new(2),
        DetectionConfig::default(),
        Device::Cpu,
    )
    .unwrap();
    let dets = runner.detect_rgb(&RgbImage::new(320, 320)).unwrap();
    let confidences: Vec<f32> = dets.iter().map(|d| d.confidence).collect();
    assert_eq!(confidences, vec![0.9, 0.8]);
}

#[test]
fn candle_module_can_be_wrapped() {
    let pred = Tensor::from_vec(
        vec![16f32, 16.0, 8.0, 8.0, 0.9, 1.0, 0.0],
        (1, 1, 7),
        &Device::Cpu,
    )
    .unwrap();
    let module = move |_xs: &Tensor| -> candle_core::Result<Tensor> { Ok(pred.clone()) };
    let cfg = DetectionConfig::default().with_input_size(32, 32);
    let runner = runner(ModuleModel::new(module, "fixed"), cfg);
    let dets = runner.detect_rgb(&RgbImage::new(64, 64)).unwrap();
    assert_eq!(dets[0].to_row()[..4], [24.0, 24.0, 40.0, 40.0]);
    assert_eq!(runner.model().name(), "fixed");
}

/// Uses the input and its 2x downsampling as a two-level pyramid and reads
/// the finest output as `(cx, cy, w, h, obj, cls0, cls1)` rows.
struct PyramidModel {
    fpn: FeaturePyramid,
}

impl DetectionModel for PyramidModel {
    fn forward(&self, input: &Tensor) -> Result<Vec<Tensor>, DetError> {
        let coarse = input
            .avg_pool2d(2)
            .map_err(|e| DetError::tensor_operation("downsample", e))?;
        let outputs = self.fpn.forward(&[coarse, input.clone()])?;
        let rows = outputs[1]
            .flatten_from(2)
            .and_then(|t| t.transpose(1, 2))
            .map_err(|e| DetError::tensor_operation("flatten", e))?;
        Ok(vec![rows])
    }
}

#[test]
fn zero_weight_pyramid_detector_finds_nothing() {
    let cfg = FpnConfig::new(vec![3, 3])
        .with_out_channels(vec![8, 7])
        .with_reps(1);
    let fpn = FeaturePyramid::new(&cfg, VarBuilder::zeros(DType::F32, &Device::Cpu)).unwrap();
    let detection_cfg = DetectionConfig::default().with_input_size(32, 32);
    let runner = runner(PyramidModel { fpn }, detection_cfg);

    let dets = runner.detect(bgr_pixels(48, 64, [30, 60, 90]).view()).unwrap();
    assert!(dets.is_empty());
}
