//! Image loading helpers.

use std::path::Path;

use image::{DynamicImage, RgbImage};

use crate::core::DetError;

/// Converts a DynamicImage to an RgbImage.
pub fn dynamic_to_rgb(img: DynamicImage) -> RgbImage {
    img.to_rgb8()
}

/// Loads an image from a file path and converts it to RgbImage.
///
/// # Errors
///
/// Returns [`DetError::ImageLoad`] if the file cannot be opened or decoded.
pub fn load_image(path: &Path) -> Result<RgbImage, DetError> {
    let img = image::open(path).map_err(DetError::ImageLoad)?;
    Ok(dynamic_to_rgb(img))
}
