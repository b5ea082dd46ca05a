//! Shared processor enums.

use serde::{Deserialize, Serialize};

/// Order of the three color channels in an interleaved pixel array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// Blue, green, red; what OpenCV-style capture code produces.
    #[default]
    Bgr,
    /// Red, green, blue; what the `image` crate decodes to.
    Rgb,
}

impl ChannelOrder {
    /// Source channel that feeds RGB plane `plane` of the model input.
    pub fn source_channel(self, plane: usize) -> usize {
        match self {
            ChannelOrder::Rgb => plane,
            ChannelOrder::Bgr => 2 - plane,
        }
    }
}
