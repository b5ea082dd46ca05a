//! Utility functions: device selection, image loading and tensor helpers.

pub mod device;
pub mod image;
pub mod tensor;

pub use device::parse_device;
pub use image::{dynamic_to_rgb, load_image};
pub use tensor::{element_count, upsample_bilinear_2x};

/// Initializes the tracing subscriber for logging.
///
/// This function sets up the tracing subscriber with environment filter and formatting layer.
/// It's typically called at the start of an application to enable logging.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
