//! Pre- and post-processing around the detector model.
//!
//! * [`preprocess`] - stretch resize, channel reordering and tensor layout
//! * [`suppress`] - candidate decoding and non-maximum suppression
//! * [`geometry`] - mapping boxes back to original image coordinates

pub mod geometry;
pub mod preprocess;
pub mod suppress;
pub mod types;

pub use geometry::rescale_boxes;
pub use preprocess::{ImagePreprocessor, PixelBuffer, array_to_image};
pub use suppress::{BOX_ATTRIBUTES, Suppressor, YoloSuppressor};
pub use types::ChannelOrder;
