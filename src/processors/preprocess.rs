//! Image to input-tensor conversion for the detection runner.

use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use ndarray::ArrayView3;
use rayon::prelude::*;

use crate::core::errors::{DetError, ProcessingStage, candle_to_processing};
use crate::processors::types::ChannelOrder;

/// Three interleaved 8-bit channels in whatever order the caller produced.
pub type PixelBuffer = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Copies an `(H, W, 3)` pixel array into an image buffer, keeping the
/// channel order as is.
///
/// # Errors
///
/// [`DetError::InvalidInput`] when the array is empty or does not have three
/// channels.
pub fn array_to_image(pixels: ArrayView3<u8>) -> Result<PixelBuffer, DetError> {
    let (height, width, channels) = pixels.dim();
    if channels != 3 {
        return Err(DetError::validation_error(
            "ImagePreprocessor",
            "channels",
            "3",
            &channels.to_string(),
        ));
    }
    if height == 0 || width == 0 {
        return Err(DetError::invalid_input(format!(
            "image must not be empty, got {width}x{height}"
        )));
    }
    let (w, h) = match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(DetError::invalid_input(format!(
                "image of {width}x{height} is too large"
            )));
        }
    };

    // `iter` walks in logical (row-major) order whatever the memory layout.
    let raw: Vec<u8> = pixels.iter().copied().collect();
    ImageBuffer::from_raw(w, h, raw)
        .ok_or_else(|| DetError::invalid_input("pixel buffer does not match image dimensions"))
}

/// Stretch-resizes an image to the inference size and lays it out as a
/// `(1, 3, H, W)` `f32` tensor in RGB order with values in `[0, 1]`.
///
/// Resizing uses bilinear filtering (`FilterType::Triangle`) and does not keep
/// the aspect ratio.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    /// Target `(width, height)`.
    input_size: (u32, u32),
}

impl ImagePreprocessor {
    /// Creates a preprocessor for a `(width, height)` inference canvas.
    pub fn new(input_size: (u32, u32)) -> Self {
        Self { input_size }
    }

    /// Converts an image into the model input tensor.
    ///
    /// # Arguments
    ///
    /// * `image` - Source pixels; interleaved in the order given by `order`
    /// * `order` - Channel order of `image`; BGR input is reversed to RGB
    /// * `device` - Device the tensor is created on
    ///
    /// # Returns
    ///
    /// A `(1, 3, height, width)` tensor at the configured input size.
    ///
    /// # Errors
    ///
    /// [`DetError::InvalidInput`] when the image or the inference canvas has a
    /// zero dimension.
    pub fn preprocess(
        &self,
        image: &RgbImage,
        order: ChannelOrder,
        device: &Device,
    ) -> Result<Tensor, DetError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DetError::invalid_input(format!(
                "image must not be empty, got {width}x{height}"
            )));
        }
        let (target_w, target_h) = self.input_size;
        if target_w == 0 || target_h == 0 {
            return Err(DetError::invalid_input(format!(
                "inference size must not be empty, got {target_w}x{target_h}"
            )));
        }

        let resized;
        let image = if (width, height) == self.input_size {
            image
        } else {
            resized = imageops::resize(image, target_w, target_h, FilterType::Triangle);
            &resized
        };

        let data = to_chw(image, order);
        Tensor::from_vec(data, (1, 3, target_h as usize, target_w as usize), device).map_err(|e| {
            candle_to_processing(
                ProcessingStage::Normalization,
                "failed to build input tensor",
                e,
            )
        })
    }
}

/// Planar RGB, scaled by `1/255`.
fn to_chw(image: &RgbImage, order: ChannelOrder) -> Vec<f32> {
    let num_pixels = (image.width() * image.height()) as usize;
    let raw = image.as_raw();
    let mut out = vec![0f32; num_pixels * 3];
    out.par_chunks_mut(num_pixels)
        .enumerate()
        .for_each(|(plane, dst)| {
            let src = order.source_channel(plane);
            for (i, value) in dst.iter_mut().enumerate() {
                *value = raw[3 * i + src] as f32 / 255.0;
            }
        });
    out
}
